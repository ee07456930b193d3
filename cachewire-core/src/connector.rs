//! The connection strategy a [`crate::cluster::ClusterClient`] (and the
//! external one-time/auto-reconnect wrappers) use to turn a host string
//! into a live [`Channel`]. `cachewire-core` knows nothing about TCP or
//! any concrete async runtime I/O type; `cachewire-tokio` supplies the
//! implementation built on `tokio::net::TcpStream` + `socket2`.
//!
//! Generalizes the teacher's `Connection: Sized + Send + Sync` trait
//! (whose `connect(url) -> Result<Self, Error>` tied the connection
//! type to the protocol implementation itself) into a narrower
//! strategy object that just hands back a [`Channel`], now that the
//! channel/command model owns protocol framing instead of the
//! connection type.

use crate::channel::Channel;
use crate::socket::SocketConfig;
use async_trait::async_trait;
use std::io;

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, host: &str, config: SocketConfig) -> io::Result<Channel>;
}
