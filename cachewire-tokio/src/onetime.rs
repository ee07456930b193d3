//! A client that opens a fresh connection for every call. Grounded in
//! the teacher's per-call connect pattern (`TokioConnection::connect`
//! in `rsmc-tokio`), generalized to open-dispatch-close against the
//! channel/command model instead of a bare request/response round
//! trip. See spec.md §2.10 / SPEC_FULL.md §4.10.

use cachewire_core::client::DirectClient;
use cachewire_core::connector::ChannelConnector;
use cachewire_core::listener::{ClientListener, NoopListener};
use cachewire_core::socket::SocketConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub struct OneTimeClient {
    host: String,
    connector: Arc<dyn ChannelConnector>,
    socket_config: SocketConfig,
    read_timeout_ms: u64,
    compression_threshold_bytes: usize,
    listener: Arc<dyn ClientListener>,
}

impl OneTimeClient {
    pub fn new(
        host: impl Into<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
    ) -> Self {
        OneTimeClient {
            host: host.into(),
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold_bytes,
            listener,
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

    async fn open(&self) -> Option<DirectClient> {
        let channel = self.connector.connect(&self.host, self.socket_config).await.ok()?;
        DirectClient::new(
            channel,
            self.read_timeout_ms,
            self.compression_threshold_bytes,
            self.listener.clone(),
        )
        .ok()
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &[u8]) -> Option<V> {
        let client = self.open().await?;
        let result = client.get(key).await;
        client.close();
        result
    }

    pub async fn multi_get<V: DeserializeOwned>(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, V> {
        let Some(client) = self.open().await else {
            return HashMap::new();
        };
        let result = client.multi_get(keys).await;
        client.close();
        result
    }

    pub async fn set<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        let Some(client) = self.open().await else {
            return false;
        };
        let result = client.set(key, value, expiry).await;
        client.close();
        result
    }

    pub async fn add<V: Serialize + ?Sized>(&self, key: &[u8], value: &V, expiry: i64) -> bool {
        let Some(client) = self.open().await else {
            return false;
        };
        let result = client.add(key, value, expiry).await;
        client.close();
        result
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        let Some(client) = self.open().await else {
            return false;
        };
        let result = client.delete(key).await;
        client.close();
        result
    }

    pub async fn touch(&self, key: &[u8], expiry: i64) -> bool {
        let Some(client) = self.open().await else {
            return false;
        };
        let result = client.touch(key, expiry).await;
        client.close();
        result
    }

    pub async fn add_and_get(&self, key: &[u8], delta: i64, initial: i64, expiry: i64) -> Option<u64> {
        let client = self.open().await?;
        let result = client.add_and_get(key, delta, initial, expiry).await;
        client.close();
        result
    }
}
