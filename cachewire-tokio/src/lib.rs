//! The tokio runtime binding for `cachewire-core`: a socket2-tuned TCP
//! `ChannelConnector`, plus the single-call and auto-reconnecting
//! external client wrappers built on top of it.

mod autoreconnect;
mod onetime;
mod socket;

pub use autoreconnect::AutoReconnectClient;
pub use onetime::OneTimeClient;
pub use socket::TcpConnector;

pub use cachewire_core::{
    ChannelConnector, ClientListener, ClusterClient, ClusterError, ClusterListener, DirectClient,
    Error, NoopClusterListener, NoopListener, ReloadableCluster, SocketConfig, ValidationError,
};
