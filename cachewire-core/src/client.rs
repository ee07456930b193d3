//! The direct client: validates arguments, transcodes values, and
//! wraps a single [`Channel`] with deadline/listener bookkeeping. See
//! spec.md §4.7.

use crate::byte_codec::unpack_u64_be;
use crate::channel::{Channel, ChannelError};
use crate::command::{Command, GetCommand, MultiGetCommand, SingleCommand};
use crate::error::ValidationError;
use crate::limits::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH, SLOW_EXECUTION_THRESHOLD};
use crate::listener::{guarded, ClientListener, NoopListener};
use crate::protocol::{
    Packet, Status, ADD_OPCODE, DECREMENT_OPCODE, DELETE_OPCODE, INCREMENT_OPCODE, SET_OPCODE,
    TOUCH_OPCODE,
};
use crate::transcoder;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wraps one [`Channel`] with the validation/deadline/listener policy
/// spec.md §4.7 specifies. Never panics and never returns a `Result`
/// to the caller: every failure collapses into the documented sentinel
/// (`None`/`false`/empty map) plus a listener callback (spec.md §7).
pub struct DirectClient {
    channel: Channel,
    read_timeout: Duration,
    compression_threshold: usize,
    listener: Arc<dyn ClientListener>,
}

impl DirectClient {
    /// Rejects construction if `read_timeout_ms` or
    /// `compression_threshold_bytes` is not positive.
    pub fn new(
        channel: Channel,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
    ) -> Result<Self, ValidationError> {
        if read_timeout_ms == 0 {
            return Err(ValidationError::NonPositiveTimeout);
        }
        if compression_threshold_bytes == 0 {
            return Err(ValidationError::NonPositiveThreshold);
        }
        Ok(DirectClient {
            channel,
            read_timeout: Duration::from_millis(read_timeout_ms),
            compression_threshold: compression_threshold_bytes,
            listener,
        })
    }

    /// Construct with [`NoopListener`].
    pub fn without_listener(
        channel: Channel,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
    ) -> Result<Self, ValidationError> {
        Self::new(channel, read_timeout_ms, compression_threshold_bytes, Arc::new(NoopListener))
    }

    pub fn host(&self) -> &str {
        self.channel.host()
    }

    pub fn is_active(&self) -> bool {
        self.channel.is_active()
    }

    pub fn close(&self) {
        self.channel.close();
    }

    fn record_slow(&self, elapsed: Duration) {
        if elapsed > SLOW_EXECUTION_THRESHOLD {
            let nanos = elapsed.as_nanos() as u64;
            let listener = &self.listener;
            guarded(|| listener.on_slow_execution(nanos));
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(ValidationError::KeyTooLong {
                length: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    fn on_validation_failure(&self, key: &[u8], err: ValidationError) {
        let listener = &self.listener;
        match err {
            ValidationError::EmptyKey | ValidationError::KeyTooLong { .. } => {
                guarded(|| listener.on_invalid_key(key));
            }
            ValidationError::ValueTooLarge { .. } => {
                guarded(|| listener.on_invalid_value(key));
            }
            ValidationError::NegativeExpiry(value) => {
                guarded(|| listener.on_invalid_expiry(key, value));
            }
            _ => {
                let message = err.to_string();
                guarded(|| listener.on_error(&message));
            }
        }
    }

    fn on_channel_closed(&self) {
        let host = self.channel.host().to_string();
        let listener = &self.listener;
        guarded(|| listener.on_closed(&host));
    }

    fn on_timeout(&self) {
        let host = self.channel.host().to_string();
        let listener = &self.listener;
        guarded(|| listener.on_timeout(&host));
    }

    fn on_error(&self, message: &str) {
        let listener = &self.listener;
        guarded(|| listener.on_error(message));
    }

    fn on_key_not_found(&self, keys: &[Vec<u8>]) {
        let listener = &self.listener;
        guarded(|| listener.on_key_not_found(keys));
    }

    /// Send `command` and classify the outcome per spec.md §4.7 steps
    /// 2, 5, 6, 7: closed channel, cancellation (also surfaced as
    /// "closed" -- the command observed an empty result because the
    /// channel tore down while it waited), timeout, or a success list
    /// of response packets to interpret further.
    async fn dispatch(&self, command: Command) -> Option<Vec<Packet>> {
        if !self.channel.is_active() {
            self.on_channel_closed();
            return None;
        }
        match self.channel.send(command, self.read_timeout).await {
            Ok(responses) if responses.is_empty() => {
                self.on_channel_closed();
                None
            }
            Ok(responses) => Some(responses),
            Err(ChannelError::Closed) => {
                self.on_channel_closed();
                None
            }
            Err(ChannelError::Timeout) => {
                self.on_timeout();
                None
            }
        }
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &[u8]) -> Option<V> {
        let start = Instant::now();
        let result = self.get_inner(key).await;
        self.record_slow(start.elapsed());
        result
    }

    async fn get_inner<V: DeserializeOwned>(&self, key: &[u8]) -> Option<V> {
        if let Err(err) = self.validate_key(key) {
            self.on_validation_failure(key, err);
            return None;
        }
        let command = Command::Get(GetCommand::new(key.to_vec()));
        let responses = self.dispatch(command).await?;
        let response = responses.into_iter().next()?;
        self.decode_response(key, response)
    }

    fn decode_response<V: DeserializeOwned>(&self, key: &[u8], response: Packet) -> Option<V> {
        match response.error_for_status() {
            Ok(()) => match transcoder::decode::<V>(&response.extras, &response.value) {
                Ok(value) => Some(value),
                Err(err) => {
                    self.on_error(&err.to_string());
                    None
                }
            },
            Err(Status::KeyNotFound) => {
                self.on_key_not_found(std::slice::from_ref(&key.to_vec()));
                None
            }
            Err(status) => {
                self.on_error(&status.message());
                None
            }
        }
    }

    /// Never returns `null`: misses are simply absent from the map.
    /// The miss set (if any) is reported once via `on_key_not_found`.
    pub async fn multi_get<V: DeserializeOwned>(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, V> {
        let start = Instant::now();
        let result = self.multi_get_inner(keys).await;
        self.record_slow(start.elapsed());
        result
    }

    async fn multi_get_inner<V: DeserializeOwned>(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, V> {
        let mut valid_keys = Vec::with_capacity(keys.len());
        for key in keys {
            match self.validate_key(key) {
                Ok(()) => valid_keys.push(key.clone()),
                Err(err) => self.on_validation_failure(key, err),
            }
        }
        if valid_keys.is_empty() {
            return HashMap::new();
        }

        let command = Command::MultiGet(Arc::new(MultiGetCommand::new(&valid_keys)));
        let responses = match self.dispatch(command).await {
            Some(responses) => responses,
            None => return HashMap::new(),
        };

        let mut hits = HashMap::with_capacity(responses.len());
        for response in responses {
            match response.error_for_status() {
                Ok(()) => {
                    match transcoder::decode::<V>(&response.extras, &response.value) {
                        Ok(value) => {
                            hits.insert(response.key.clone(), value);
                        }
                        Err(err) => self.on_error(&err.to_string()),
                    }
                }
                Err(Status::KeyNotFound) => {}
                Err(status) => self.on_error(&status.message()),
            }
        }

        let misses: Vec<Vec<u8>> = valid_keys
            .into_iter()
            .filter(|key| !hits.contains_key(key))
            .collect();
        if !misses.is_empty() {
            self.on_key_not_found(&misses);
        }
        hits
    }

    pub async fn set<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        let start = Instant::now();
        let result = self
            .store(key, value, expiry, SET_OPCODE, Packet::set)
            .await;
        self.record_slow(start.elapsed());
        result
    }

    pub async fn add<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        let start = Instant::now();
        let result = self
            .store(key, value, expiry, ADD_OPCODE, Packet::add)
            .await;
        self.record_slow(start.elapsed());
        result
    }

    async fn store<V: Serialize + ?Sized>(
        &self,
        key: &[u8],
        value: &V,
        expiry: i64,
        opcode: u8,
        build: fn(&[u8], Vec<u8>, u32, u32) -> Packet,
    ) -> bool {
        if let Err(err) = self.validate_key(key) {
            self.on_validation_failure(key, err);
            return false;
        }
        if expiry < 0 {
            self.on_validation_failure(key, ValidationError::NegativeExpiry(expiry));
            return false;
        }
        let serialized_len = match bincode::serialized_size(value) {
            Ok(len) => len as usize,
            Err(err) => {
                self.on_error(&err.to_string());
                return false;
            }
        };
        if serialized_len > MAX_VALUE_LENGTH {
            self.on_validation_failure(
                key,
                ValidationError::ValueTooLarge {
                    length: serialized_len,
                    max: MAX_VALUE_LENGTH,
                },
            );
            return false;
        }
        let (flags, body) = match transcoder::encode(value, self.compression_threshold) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.on_error(&err.to_string());
                return false;
            }
        };
        let flags_u32 = u32::from_be_bytes(flags);
        let packet = build(key, body, flags_u32, expiry as u32);
        let command = Command::Single(SingleCommand::new(packet.into_bytes(), opcode));
        match self.dispatch(command).await {
            Some(responses) => self.store_succeeded(key, responses),
            None => false,
        }
    }

    fn store_succeeded(&self, key: &[u8], responses: Vec<Packet>) -> bool {
        let Some(response) = responses.into_iter().next() else {
            return false;
        };
        match response.error_for_status() {
            Ok(()) => true,
            Err(Status::KeyNotFound) => {
                self.on_key_not_found(std::slice::from_ref(&key.to_vec()));
                false
            }
            Err(status) => {
                self.on_error(&status.message());
                false
            }
        }
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        let start = Instant::now();
        let result = self.delete_inner(key).await;
        self.record_slow(start.elapsed());
        result
    }

    async fn delete_inner(&self, key: &[u8]) -> bool {
        if let Err(err) = self.validate_key(key) {
            self.on_validation_failure(key, err);
            return false;
        }
        let command = Command::Single(SingleCommand::new(
            Packet::delete(key).into_bytes(),
            DELETE_OPCODE,
        ));
        match self.dispatch(command).await {
            Some(responses) => self.store_succeeded(key, responses),
            None => false,
        }
    }

    pub async fn touch(&self, key: &[u8], expiry: i64) -> bool {
        let start = Instant::now();
        let result = self.touch_inner(key, expiry).await;
        self.record_slow(start.elapsed());
        result
    }

    async fn touch_inner(&self, key: &[u8], expiry: i64) -> bool {
        if let Err(err) = self.validate_key(key) {
            self.on_validation_failure(key, err);
            return false;
        }
        if expiry < 0 {
            self.on_validation_failure(key, ValidationError::NegativeExpiry(expiry));
            return false;
        }
        let command = Command::Single(SingleCommand::new(
            Packet::touch(key, expiry as u32).into_bytes(),
            TOUCH_OPCODE,
        ));
        match self.dispatch(command).await {
            Some(responses) => self.store_succeeded(key, responses),
            None => false,
        }
    }

    /// `delta >= 0` issues INCREMENT; a negative delta issues DECREMENT
    /// with its absolute value (spec.md §4.7).
    pub async fn add_and_get(&self, key: &[u8], delta: i64, initial: i64, expiry: i64) -> Option<u64> {
        let start = Instant::now();
        let result = self.add_and_get_inner(key, delta, initial, expiry).await;
        self.record_slow(start.elapsed());
        result
    }

    async fn add_and_get_inner(&self, key: &[u8], delta: i64, initial: i64, expiry: i64) -> Option<u64> {
        if let Err(err) = self.validate_key(key) {
            self.on_validation_failure(key, err);
            return None;
        }
        if initial < 0 {
            self.on_validation_failure(key, ValidationError::NegativeInitialValue);
            return None;
        }
        if expiry < 0 {
            self.on_validation_failure(key, ValidationError::NegativeExpiry(expiry));
            return None;
        }
        let (packet, opcode) = if delta >= 0 {
            (
                Packet::increment(key, delta as u64, initial as u64, expiry as u32),
                INCREMENT_OPCODE,
            )
        } else {
            (
                Packet::decrement(key, delta.unsigned_abs(), initial as u64, expiry as u32),
                DECREMENT_OPCODE,
            )
        };
        let command = Command::Single(SingleCommand::new(packet.into_bytes(), opcode));
        let responses = self.dispatch(command).await?;
        let response = responses.into_iter().next()?;
        match response.error_for_status() {
            Ok(()) => {
                if response.value.len() < 8 {
                    self.on_error("incr/decr response body shorter than 8 bytes");
                    return None;
                }
                Some(unpack_u64_be(&response.value, 0))
            }
            Err(Status::KeyNotFound) => {
                self.on_key_not_found(std::slice::from_ref(&key.to_vec()));
                None
            }
            Err(status) => {
                self.on_error(&status.message());
                None
            }
        }
    }
}
