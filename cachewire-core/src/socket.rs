//! Socket configuration: a pure-data description of the TCP options a
//! [`crate::channel::Channel`] connects with. The factory that actually
//! builds a socket from this config lives in `cachewire-tokio`, since
//! it needs a concrete `Socket`/`TcpStream`; this crate only carries
//! the data and its default. See spec.md §4.2.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    pub keep_alive: bool,
    pub no_delay: bool,
    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub connect_timeout: Duration,
    pub linger: Option<Duration>,
}

impl SocketConfig {
    /// keep-alive on, Nagle left enabled (`no_delay` unset), 32 KiB
    /// send/receive buffers, a 30s connect timeout, no linger -- the
    /// defaults spec.md §6 lists.
    pub const DEFAULT: SocketConfig = SocketConfig {
        keep_alive: true,
        no_delay: false,
        send_buffer_size: 32 * 1024,
        receive_buffer_size: 32 * 1024,
        connect_timeout: Duration::from_secs(30),
        linger: None,
    };
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
