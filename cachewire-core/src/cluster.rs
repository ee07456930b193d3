//! The cluster client: routes keys to one of several direct clients via
//! jump consistent hashing, falls back to a live replica when the
//! primary shard is down, and runs a background rescue worker that
//! re-creates dead shards. See spec.md §4.8.

use crate::client::DirectClient;
use crate::connector::ChannelConnector;
use crate::hash::jump_consistent_hash;
use crate::listener::{guarded, ClientListener, ClusterListener, NoopClusterListener, NoopListener};
use crate::socket::SocketConfig;
use arc_swap::ArcSwap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// The only two cluster-wide states a `ClusterClient` occupies (unlike
/// a channel, there is no `Uninitialized` -- a cluster is either fully
/// constructed or it never exists, per `new`'s atomicity).
const MAX_MULTI_GET_WORKERS: usize = 200;
const RESCUE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ClusterError {
    EmptyHostList,
    NoAliveHosts,
}

impl Display for ClusterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ClusterError::EmptyHostList => write!(f, "cluster requires at least one host"),
            ClusterError::NoAliveHosts => {
                write!(f, "no host in the cluster could be reached during construction")
            }
        }
    }
}

impl std::error::Error for ClusterError {}

pub struct ClusterClient {
    hosts: Vec<String>,
    clients: ArcSwap<Vec<Option<Arc<DirectClient>>>>,
    alive: Mutex<HashSet<usize>>,
    closed: AtomicBool,
    rescue_running: Mutex<bool>,
    connector: Arc<dyn ChannelConnector>,
    socket_config: SocketConfig,
    read_timeout_ms: u64,
    compression_threshold: usize,
    listener: Arc<dyn ClientListener>,
    cluster_listener: Arc<dyn ClusterListener>,
}

impl ClusterClient {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        hosts: Vec<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
        cluster_listener: Arc<dyn ClusterListener>,
    ) -> Result<Arc<Self>, ClusterError> {
        if hosts.is_empty() {
            return Err(ClusterError::EmptyHostList);
        }

        let mut clients = Vec::with_capacity(hosts.len());
        let mut alive = HashSet::new();
        for (index, host) in hosts.iter().enumerate() {
            match Self::build_direct_client(
                &connector,
                host,
                socket_config,
                read_timeout_ms,
                compression_threshold_bytes,
                listener.clone(),
            )
            .await
            {
                Some(client) => {
                    clients.push(Some(client));
                    alive.insert(index);
                    let cl = &cluster_listener;
                    guarded(|| cl.on_created(host));
                }
                None => {
                    clients.push(None);
                    let cl = &cluster_listener;
                    guarded(|| cl.on_closed(host));
                }
            }
        }

        if alive.is_empty() {
            return Err(ClusterError::NoAliveHosts);
        }

        Ok(Arc::new(ClusterClient {
            hosts,
            clients: ArcSwap::from_pointee(clients),
            alive: Mutex::new(alive),
            closed: AtomicBool::new(false),
            rescue_running: Mutex::new(false),
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold: compression_threshold_bytes,
            listener,
            cluster_listener,
        }))
    }

    /// Convenience constructor with no-op listeners.
    pub async fn without_listeners(
        hosts: Vec<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
    ) -> Result<Arc<Self>, ClusterError> {
        Self::new(
            hosts,
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold_bytes,
            Arc::new(NoopListener),
            Arc::new(NoopClusterListener),
        )
        .await
    }

    async fn build_direct_client(
        connector: &Arc<dyn ChannelConnector>,
        host: &str,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
    ) -> Option<Arc<DirectClient>> {
        let channel = match connector.connect(host, socket_config).await {
            Ok(channel) => channel,
            Err(err) => {
                log::warn!("cachewire: failed to connect to {}: {}", host, err);
                return None;
            }
        };
        match DirectClient::new(channel, read_timeout_ms, compression_threshold_bytes, listener) {
            Ok(client) => Some(Arc::new(client)),
            Err(err) => {
                log::warn!("cachewire: rejected direct client config for {}: {}", host, err);
                None
            }
        }
    }

    /// `idx = jump_consistent_hash(key, hosts.len())`; if that shard is
    /// live, use it. Otherwise evict it (if it was marked alive),
    /// kick off the rescue worker, and fall back to
    /// `alive[jump_consistent_hash(key, alive.len())]` -- a deliberate
    /// "key drift" trade-off (availability over locality, spec.md §9
    /// Open Question #3).
    fn resolve(self: &Arc<Self>, key: &[u8]) -> Option<Arc<DirectClient>> {
        let idx = jump_consistent_hash(key, self.hosts.len());
        let snapshot = self.clients.load();
        if let Some(Some(client)) = snapshot.get(idx) {
            if client.is_active() {
                return Some(client.clone());
            }
        }
        drop(snapshot);

        let was_alive = {
            let mut alive = self.alive.lock().unwrap();
            alive.remove(&idx)
        };
        if was_alive {
            self.clients.rcu(|old| {
                let mut updated = (**old).clone();
                updated[idx] = None;
                updated
            });
            let host = &self.hosts[idx];
            let cl = &self.cluster_listener;
            guarded(|| cl.on_closed(host));
        }

        self.start_rescue();

        let mut alive_indices: Vec<usize> = self.alive.lock().unwrap().iter().copied().collect();
        if alive_indices.is_empty() {
            return None;
        }
        alive_indices.sort_unstable();
        let fallback = alive_indices[jump_consistent_hash(key, alive_indices.len())];
        self.clients.load().get(fallback).cloned().flatten()
    }

    fn start_rescue(self: &Arc<Self>) {
        {
            let mut running = self.rescue_running.lock().unwrap();
            if *running {
                return;
            }
            *running = true;
        }
        let cluster = self.clone();
        tokio::spawn(async move {
            cluster.run_rescue().await;
        });
    }

    async fn run_rescue(self: Arc<Self>) {
        while !self.closed.load(Ordering::SeqCst) && self.alive.lock().unwrap().len() < self.hosts.len() {
            for (index, host) in self.hosts.iter().enumerate() {
                if self.closed.load(Ordering::SeqCst) {
                    break;
                }
                if self.alive.lock().unwrap().contains(&index) {
                    continue;
                }
                if let Some(client) = Self::build_direct_client(
                    &self.connector,
                    host,
                    self.socket_config,
                    self.read_timeout_ms,
                    self.compression_threshold,
                    self.listener.clone(),
                )
                .await
                {
                    self.clients.rcu(|old| {
                        let mut updated = (**old).clone();
                        updated[index] = Some(client.clone());
                        updated
                    });
                    self.alive.lock().unwrap().insert(index);
                    let cl = &self.cluster_listener;
                    guarded(|| cl.on_recovered(host));
                }
            }
            tokio::time::sleep(RESCUE_INTERVAL).await;
        }
        *self.rescue_running.lock().unwrap() = false;
    }

    pub async fn get<V: DeserializeOwned>(self: &Arc<Self>, key: &[u8]) -> Option<V> {
        match self.resolve(key) {
            Some(client) => client.get(key).await,
            None => None,
        }
    }

    /// Partitions keys by resolved shard. A single resolved shard is
    /// called directly; multiple shards fan out across a
    /// `Semaphore`-bounded worker pool (the async analogue of spec.md
    /// §4.8's "core 0, max 200, keep-alive 60s" thread pool -- see
    /// DESIGN.md for why "core"/"keep-alive" have no async equivalent).
    /// A shard with no resolvable client contributes no entries; a
    /// shard the pool has no permit for is skipped and logged, mirroring
    /// the source's "rejected tasks are counted and skipped".
    pub async fn multi_get<V: DeserializeOwned>(
        self: &Arc<Self>,
        keys: &[Vec<u8>],
    ) -> HashMap<Vec<u8>, V> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let mut groups: HashMap<usize, (Arc<DirectClient>, Vec<Vec<u8>>)> = HashMap::new();
        for key in keys {
            if let Some(client) = self.resolve(key) {
                let identity = Arc::as_ptr(&client) as usize;
                groups
                    .entry(identity)
                    .or_insert_with(|| (client.clone(), Vec::new()))
                    .1
                    .push(key.clone());
            }
        }

        if groups.len() <= 1 {
            return match groups.into_values().next() {
                Some((client, group_keys)) => client.multi_get(&group_keys).await,
                None => HashMap::new(),
            };
        }

        let semaphore = Arc::new(Semaphore::new(MAX_MULTI_GET_WORKERS));
        let mut in_flight = FuturesUnordered::new();
        for (_, (client, group_keys)) in groups {
            match semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    in_flight.push(async move {
                        let result = client.multi_get::<V>(&group_keys).await;
                        drop(permit);
                        result
                    });
                }
                Err(_) => {
                    log::warn!(
                        "cachewire: multi_get worker pool saturated, skipping shard {}",
                        client.host()
                    );
                }
            }
        }

        let mut merged = HashMap::new();
        while let Some(result) = in_flight.next().await {
            merged.extend(result);
        }
        merged
    }

    pub async fn set<V: Serialize + ?Sized>(self: &Arc<Self>, key: &[u8], value: &V, expiry: i64) -> bool {
        match self.resolve(key) {
            Some(client) => client.set(key, value, expiry).await,
            None => false,
        }
    }

    pub async fn add<V: Serialize + ?Sized>(self: &Arc<Self>, key: &[u8], value: &V, expiry: i64) -> bool {
        match self.resolve(key) {
            Some(client) => client.add(key, value, expiry).await,
            None => false,
        }
    }

    pub async fn delete(self: &Arc<Self>, key: &[u8]) -> bool {
        match self.resolve(key) {
            Some(client) => client.delete(key).await,
            None => false,
        }
    }

    pub async fn touch(self: &Arc<Self>, key: &[u8], expiry: i64) -> bool {
        match self.resolve(key) {
            Some(client) => client.touch(key, expiry).await,
            None => false,
        }
    }

    pub async fn add_and_get(self: &Arc<Self>, key: &[u8], delta: i64, initial: i64, expiry: i64) -> Option<u64> {
        match self.resolve(key) {
            Some(client) => client.add_and_get(key, delta, initial, expiry).await,
            None => None,
        }
    }

    /// Snapshot of the currently alive host count, for tests and the
    /// reloadable façade's diagnostics.
    pub fn alive_count(&self) -> usize {
        self.alive.lock().unwrap().len()
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The per-request read timeout this cluster's direct clients were
    /// built with. Exposed so a reload can derive the old cluster's
    /// close-after grace period from it (spec.md §4.9).
    pub fn read_timeout_ms(&self) -> u64 {
        self.read_timeout_ms
    }

    /// Idempotent. Closes every still-alive direct client. There is no
    /// persistent multi-get worker pool to shut down -- each call
    /// builds its own bounded `Semaphore`, so "shut down the pool"
    /// degenerates to closing the shards themselves.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for client in self.clients.load().iter().flatten() {
            client.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;

    struct FakeConnector {
        attempts: AtomicUsize,
        fail_hosts: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl ChannelConnector for FakeConnector {
        async fn connect(&self, host: &str, _config: SocketConfig) -> std::io::Result<Channel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_hosts.lock().unwrap().contains(host) {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "down"));
            }
            let (client_io, server_io) = duplex(8192);
            tokio::spawn(async move {
                let _keep_alive = server_io;
                std::future::pending::<()>().await;
            });
            Ok(Channel::connect(host.to_string(), client_io, 32 * 1024))
        }
    }

    #[tokio::test]
    async fn rejects_empty_host_list() {
        let connector = Arc::new(FakeConnector {
            attempts: AtomicUsize::new(0),
            fail_hosts: Mutex::new(HashSet::new()),
        });
        let result = ClusterClient::without_listeners(vec![], connector, SocketConfig::DEFAULT, 1000, 65_536).await;
        assert_eq!(Err(ClusterError::EmptyHostList), result);
    }

    #[tokio::test]
    async fn constructs_with_some_hosts_unreachable() {
        let mut fail_hosts = HashSet::new();
        fail_hosts.insert("h2".to_string());
        let connector = Arc::new(FakeConnector {
            attempts: AtomicUsize::new(0),
            fail_hosts: Mutex::new(fail_hosts),
        });
        let cluster = ClusterClient::without_listeners(
            vec!["h1".to_string(), "h2".to_string(), "h3".to_string()],
            connector,
            SocketConfig::DEFAULT,
            1000,
            65_536,
        )
        .await
        .unwrap();
        assert_eq!(2, cluster.alive_count());
    }
}
