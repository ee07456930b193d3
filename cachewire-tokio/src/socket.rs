//! Turns a host string into a live [`Channel`] over a real TCP socket,
//! tuned with `socket2` before tokio ever sees it. Generalizes the
//! teacher's `TokioConnection::connect` (which opened a bare
//! `TcpStream::connect` with no socket tuning) to honor
//! `SocketConfig`'s keep-alive/no-delay/buffer-size/linger/connect-timeout
//! options (spec.md §4.2).

use async_trait::async_trait;
use cachewire_core::channel::Channel;
use cachewire_core::connector::ChannelConnector;
use cachewire_core::socket::SocketConfig;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::io;
use std::net::ToSocketAddrs;
use tokio::net::TcpStream;

/// The default [`ChannelConnector`]: resolves `host` with the standard
/// library resolver, builds a `socket2::Socket` with the requested
/// options, connects with a timeout, then hands the result to tokio.
/// DNS resolution and the blocking `connect_timeout` call run on the
/// blocking thread pool so the connecting task never stalls the
/// runtime's reactor.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl ChannelConnector for TcpConnector {
    async fn connect(&self, host: &str, config: SocketConfig) -> io::Result<Channel> {
        let host_owned = host.to_string();
        let dial_host = host_owned.clone();
        let std_stream = tokio::task::spawn_blocking(move || connect_blocking(&dial_host, config))
            .await
            .map_err(|join_err| io::Error::new(io::ErrorKind::Other, join_err))??;
        std_stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(std_stream)?;
        Ok(Channel::connect(host_owned, stream, config.send_buffer_size))
    }
}

fn connect_blocking(host: &str, config: SocketConfig) -> io::Result<std::net::TcpStream> {
    let addr = host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address found for {}", host)))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(config.no_delay)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    socket.set_recv_buffer_size(config.receive_buffer_size)?;
    if config.keep_alive {
        socket.set_tcp_keepalive(&TcpKeepalive::new())?;
    }
    if let Some(linger) = config.linger {
        socket.set_linger(Some(linger))?;
    }
    socket.connect_timeout(&addr.into(), config.connect_timeout)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connecting_to_a_closed_port_fails() {
        let connector = TcpConnector;
        let mut config = SocketConfig::DEFAULT;
        config.connect_timeout = std::time::Duration::from_millis(200);
        let result = connector.connect("127.0.0.1:1", config).await;
        assert!(result.is_err());
    }
}
