//! A client that holds one connection open across calls and
//! transparently reconnects it once it goes inactive. See spec.md
//! §2.10 / SPEC_FULL.md §4.10.

use cachewire_core::client::DirectClient;
use cachewire_core::connector::ChannelConnector;
use cachewire_core::listener::{ClientListener, NoopListener};
use cachewire_core::socket::SocketConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AutoReconnectClient {
    host: String,
    connector: Arc<dyn ChannelConnector>,
    socket_config: SocketConfig,
    read_timeout_ms: u64,
    compression_threshold_bytes: usize,
    listener: Arc<dyn ClientListener>,
    held: Mutex<Option<Arc<DirectClient>>>,
}

impl AutoReconnectClient {
    pub fn new(
        host: impl Into<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
    ) -> Self {
        AutoReconnectClient {
            host: host.into(),
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold_bytes,
            listener,
            held: Mutex::new(None),
        }
    }

    pub fn without_listener(
        host: impl Into<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
    ) -> Self {
        Self::new(
            host,
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold_bytes,
            Arc::new(NoopListener),
        )
    }

    /// Returns the held client if it is still active, otherwise opens
    /// and stores a fresh one. Holding the lock across the connect
    /// `.await` means two concurrent callers racing a dead connection
    /// dial only one replacement, not one each.
    async fn ensure_connected(&self) -> Option<Arc<DirectClient>> {
        let mut guard = self.held.lock().await;
        if let Some(client) = guard.as_ref() {
            if client.is_active() {
                return Some(client.clone());
            }
        }
        let channel = self.connector.connect(&self.host, self.socket_config).await.ok()?;
        let client = Arc::new(
            DirectClient::new(
                channel,
                self.read_timeout_ms,
                self.compression_threshold_bytes,
                self.listener.clone(),
            )
            .ok()?,
        );
        *guard = Some(client.clone());
        Some(client)
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &[u8]) -> Option<V> {
        match self.ensure_connected().await {
            Some(client) => client.get(key).await,
            None => None,
        }
    }

    pub async fn multi_get<V: DeserializeOwned>(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, V> {
        match self.ensure_connected().await {
            Some(client) => client.multi_get(keys).await,
            None => HashMap::new(),
        }
    }

    pub async fn set<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        match self.ensure_connected().await {
            Some(client) => client.set(key, value, expiry).await,
            None => false,
        }
    }

    pub async fn add<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        match self.ensure_connected().await {
            Some(client) => client.add(key, value, expiry).await,
            None => false,
        }
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        match self.ensure_connected().await {
            Some(client) => client.delete(key).await,
            None => false,
        }
    }

    pub async fn touch(&self, key: &[u8], expiry: i64) -> bool {
        match self.ensure_connected().await {
            Some(client) => client.touch(key, expiry).await,
            None => false,
        }
    }

    pub async fn add_and_get(&self, key: &[u8], delta: i64, initial: i64, expiry: i64) -> Option<u64> {
        match self.ensure_connected().await {
            Some(client) => client.add_and_get(key, delta, initial, expiry).await,
            None => None,
        }
    }

    pub async fn close(&self) {
        if let Some(client) = self.held.lock().await.take() {
            client.close();
        }
    }
}
