//! A hot-swappable façade over a [`ClusterClient`], for picking up a
//! new host list without restarting the process. See spec.md §4.9.

use crate::cluster::{ClusterClient, ClusterError};
use crate::connector::ChannelConnector;
use crate::listener::{ClientListener, ClusterListener};
use crate::socket::SocketConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Holds the live [`ClusterClient`] behind a `Mutex`. Callers always
/// read through [`ReloadableCluster::current`]; `reload` swaps in a
/// freshly constructed cluster and lets the old one drain before
/// closing it, so requests already in flight against the old shards
/// aren't cut off mid-response.
pub struct ReloadableCluster {
    current: Mutex<Arc<ClusterClient>>,
}

impl ReloadableCluster {
    pub fn new(initial: Arc<ClusterClient>) -> Self {
        ReloadableCluster {
            current: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Arc<ClusterClient> {
        self.current.lock().unwrap().clone()
    }

    /// Builds a new `ClusterClient` for `hosts`, swaps it in as
    /// [`current`](Self::current), then closes the previous cluster
    /// once its own `read_timeout_ms` has elapsed -- long enough for
    /// requests already dispatched against it to finish or time out
    /// (spec.md §4.9: the old cluster closes after `prev.timeout_ms`).
    /// A construction failure (no host reachable) leaves the old
    /// cluster serving traffic untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn reload(
        &self,
        hosts: Vec<String>,
        connector: Arc<dyn ChannelConnector>,
        socket_config: SocketConfig,
        read_timeout_ms: u64,
        compression_threshold_bytes: usize,
        listener: Arc<dyn ClientListener>,
        cluster_listener: Arc<dyn ClusterListener>,
    ) -> Result<(), ClusterError> {
        let replacement = ClusterClient::new(
            hosts,
            connector,
            socket_config,
            read_timeout_ms,
            compression_threshold_bytes,
            listener,
            cluster_listener,
        )
        .await?;

        let previous = {
            let mut guard = self.current.lock().unwrap();
            std::mem::replace(&mut *guard, replacement)
        };
        let grace_period = Duration::from_millis(previous.read_timeout_ms());
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            previous.close();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::io::duplex;

    struct FakeConnector;

    #[async_trait]
    impl ChannelConnector for FakeConnector {
        async fn connect(&self, host: &str, _config: SocketConfig) -> std::io::Result<Channel> {
            let (client_io, server_io) = duplex(8192);
            tokio::spawn(async move {
                let _keep_alive = server_io;
                std::future::pending::<()>().await;
            });
            Ok(Channel::connect(host.to_string(), client_io, 32 * 1024))
        }
    }

    async fn fresh_cluster(hosts: &[&str]) -> Arc<ClusterClient> {
        ClusterClient::without_listeners(
            hosts.iter().map(|h| h.to_string()).collect(),
            Arc::new(FakeConnector),
            SocketConfig::DEFAULT,
            1000,
            65_536,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reload_swaps_in_the_new_cluster_immediately() {
        let initial = fresh_cluster(&["a"]).await;
        let facade = ReloadableCluster::new(initial);
        assert_eq!(&["a".to_string()], facade.current().hosts());

        facade
            .reload(
                vec!["b".to_string(), "c".to_string()],
                Arc::new(FakeConnector),
                SocketConfig::DEFAULT,
                1000,
                65_536,
                Arc::new(crate::listener::NoopListener),
                Arc::new(crate::listener::NoopClusterListener),
            )
            .await
            .unwrap();

        let hosts: HashSet<&String> = facade.current().hosts().iter().collect();
        assert!(hosts.contains(&"b".to_string()));
        assert!(hosts.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn failed_reload_leaves_the_previous_cluster_in_place() {
        let initial = fresh_cluster(&["a"]).await;
        let facade = ReloadableCluster::new(initial);

        let result = facade
            .reload(
                vec![],
                Arc::new(FakeConnector),
                SocketConfig::DEFAULT,
                1000,
                65_536,
                Arc::new(crate::listener::NoopListener),
                Arc::new(crate::listener::NoopClusterListener),
            )
            .await;

        assert_eq!(Err(ClusterError::EmptyHostList), result);
        assert_eq!(&["a".to_string()], facade.current().hosts());
    }
}
