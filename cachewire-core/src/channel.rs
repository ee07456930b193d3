//! The Channel: a single shared duplex connection turned into a
//! pipelined, multiplexed request/response engine. Owns one socket, a
//! single writer+reader task, and the FIFO of commands awaiting a
//! response. See spec.md §4.6.

use crate::command::{AwaitError, Command};
use crate::protocol::{Header, Packet, HEADER_LENGTH};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// More than this many consecutive timeouts, each spaced less than
/// [`TIMEOUT_FLOOD_WINDOW`] apart, closes the channel: the remote is
/// presumed unresponsive (spec.md §3/§5, Testable Property #8).
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 50;
const TIMEOUT_FLOOD_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChannelState {
    Uninitialized = 0,
    Normal = 1,
    Closed = 2,
}

impl From<u8> for ChannelState {
    fn from(val: u8) -> Self {
        match val {
            0 => ChannelState::Uninitialized,
            1 => ChannelState::Normal,
            _ => ChannelState::Closed,
        }
    }
}

/// An error returned by [`Channel::send`].
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not in the `Normal` state.
    Closed,
    /// The command's deadline elapsed before a matching response arrived.
    Timeout,
}

/// A handle to a channel's IO engine. Cloning shares the same
/// underlying connection and command queue; the channel closes itself
/// once every handle and the background worker both observe a fatal
/// condition. The handle does not carry the connection's stream type:
/// nothing in its public API depends on it, so callers (e.g.
/// [`crate::client::DirectClient`]) never need to propagate a generic
/// parameter just to hold a `Channel`.
#[derive(Debug, Clone)]
pub struct Channel {
    host: String,
    sender: mpsc::UnboundedSender<Command>,
    state: Arc<AtomicU8>,
    consecutive_timeouts: Arc<AtomicU32>,
    last_timeout: Arc<Mutex<Option<Instant>>>,
    close_notify: Arc<tokio::sync::Notify>,
}

impl Channel {
    /// Take ownership of an already-connected duplex stream and start
    /// its IO worker. The channel is `Normal` as soon as this returns;
    /// a stream that fails to connect is the caller's concern (the
    /// socket factory's job, per spec.md §4.2), not the channel's.
    pub fn connect<S>(host: String, stream: S, send_buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ChannelState::Normal as u8));
        let close_notify = Arc::new(tokio::sync::Notify::new());

        let worker_state = state.clone();
        let worker_close_notify = close_notify.clone();
        let worker_host = host.clone();
        tokio::spawn(async move {
            run_io_worker(stream, receiver, send_buffer_size).await;
            worker_state.store(ChannelState::Closed as u8, Ordering::SeqCst);
            worker_close_notify.notify_waiters();
            log::debug!("cachewire: channel to {} closed", worker_host);
        });

        Channel {
            host,
            sender,
            state,
            consecutive_timeouts: Arc::new(AtomicU32::new(0)),
            last_timeout: Arc::new(Mutex::new(None)),
            close_notify,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_active(&self) -> bool {
        ChannelState::from(self.state.load(Ordering::SeqCst)) == ChannelState::Normal
    }

    /// Enqueue `command` and wait up to `timeout` for it to complete.
    /// Tracks consecutive timeouts and self-closes past
    /// [`MAX_CONSECUTIVE_TIMEOUTS`] within [`TIMEOUT_FLOOD_WINDOW`] of
    /// each other (spec.md §4.6).
    pub async fn send(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Vec<Packet>, ChannelError> {
        if !self.is_active() {
            return Err(ChannelError::Closed);
        }
        if self.sender.send(command.clone_handle()).is_err() {
            return Err(ChannelError::Closed);
        }

        match command.await_responses(timeout).await {
            Ok(responses) => Ok(responses),
            Err(AwaitError::Timeout) => {
                self.record_timeout();
                Err(ChannelError::Timeout)
            }
        }
    }

    fn record_timeout(&self) {
        let now = Instant::now();
        let mut last = self.last_timeout.lock().unwrap();
        let within_window = last
            .map(|prev| now.saturating_duration_since(prev) < TIMEOUT_FLOOD_WINDOW)
            .unwrap_or(false);
        *last = Some(now);
        drop(last);

        let count = if within_window {
            self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.consecutive_timeouts.store(1, Ordering::SeqCst);
            1
        };

        if count > MAX_CONSECUTIVE_TIMEOUTS {
            log::warn!(
                "cachewire: {} consecutive timeouts on channel to {}, closing",
                count,
                self.host
            );
            self.close();
        }
    }

    /// Idempotent. Drops the sender half, which unblocks the IO
    /// worker's `queue.recv()` with `None` and runs the closure
    /// cascade (cancelling everything still `awaiting`).
    pub fn close(&self) {
        self.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
        self.close_notify.notify_waiters();
    }

    /// Wait for the IO worker to observe closure (used by tests and by
    /// the reloadable façade's grace-period close).
    pub async fn closed(&self) {
        if !self.is_active() {
            return;
        }
        self.close_notify.notified().await;
    }
}

impl Command {
    /// A cheap `Arc`-cloning copy suitable for handing to the channel's
    /// queue while the caller retains its own handle to await on.
    fn clone_handle(&self) -> Command {
        match self {
            Command::Get(cmd) => Command::Get(cmd.clone()),
            Command::MultiGet(cmd) => Command::MultiGet(cmd.clone()),
            Command::Single(cmd) => Command::Single(cmd.clone()),
        }
    }
}

async fn run_io_worker<S>(mut stream: S, mut queue: mpsc::UnboundedReceiver<Command>, send_buffer_size: usize)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut awaiting: VecDeque<Command> = VecDeque::new();
    let mut batch: Vec<Command> = Vec::new();
    let mut batch_size: usize = 0;

    'outer: loop {
        let cmd = match queue.recv().await {
            Some(cmd) => cmd,
            None => break,
        };
        let cmd_len = cmd.request_bytes().map(|b| b.len()).unwrap_or(0);

        if batch_size + cmd_len < send_buffer_size {
            batch.push(cmd);
            batch_size += cmd_len;
            if queue.is_empty() {
                if flush_batch(&mut stream, &mut batch, &mut batch_size, &mut awaiting)
                    .await
                    .is_err()
                {
                    break 'outer;
                }
            }
        } else {
            if flush_batch(&mut stream, &mut batch, &mut batch_size, &mut awaiting)
                .await
                .is_err()
            {
                break 'outer;
            }
            if queue.is_empty() {
                let write_result = match cmd.request_bytes() {
                    Some(bytes) => stream.write_all(bytes).await,
                    None => Ok(()),
                };
                if write_result.is_err() {
                    break 'outer;
                }
                if cmd.response_expected() {
                    awaiting.push_back(cmd);
                }
            } else {
                batch_size += cmd_len;
                batch.push(cmd);
            }
        }

        if stream.flush().await.is_err() {
            break 'outer;
        }

        while let Some(head) = awaiting.front() {
            match read_response(&mut stream).await {
                Ok(Some(packet)) => {
                    if let Err(err) = head.receive(packet) {
                        log::warn!("cachewire: protocol desync, closing channel: {}", err);
                        break 'outer;
                    }
                    if !head.response_expected() {
                        awaiting.pop_front();
                    }
                }
                Ok(None) => {
                    log::warn!("cachewire: remote closed the stream");
                    break 'outer;
                }
                Err(err) => {
                    log::warn!("cachewire: io error reading response: {}", err);
                    break 'outer;
                }
            }
        }
    }

    for cmd in awaiting.drain(..) {
        cmd.cancel();
    }
    for cmd in batch.drain(..) {
        cmd.cancel();
    }
    while let Ok(cmd) = queue.try_recv() {
        cmd.cancel();
    }
}

async fn flush_batch<S>(
    stream: &mut S,
    batch: &mut Vec<Command>,
    batch_size: &mut usize,
    awaiting: &mut VecDeque<Command>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }
    let drained = std::mem::take(batch);
    *batch_size = 0;

    let to_write = crate::command::dedup_batch(drained);
    let mut wire = Vec::new();
    for cmd in to_write {
        if let Some(bytes) = cmd.request_bytes() {
            wire.extend_from_slice(bytes);
        }
        if cmd.response_expected() {
            awaiting.push_back(cmd);
        }
    }
    if !wire.is_empty() {
        stream.write_all(&wire).await?;
    }
    Ok(())
}

async fn read_response<S>(stream: &mut S) -> io::Result<Option<Packet>>
where
    S: AsyncRead + Unpin,
{
    let mut header_buf = [0_u8; HEADER_LENGTH];
    match stream.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let header = Header::read_response(&header_buf)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    let mut body = vec![0_u8; header.body_len as usize];
    if !body.is_empty() {
        stream.read_exact(&mut body).await?;
    }
    let packet = Packet::from_response(header, &body)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    Ok(Some(packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{GetCommand, SingleCommand};
    use crate::protocol::{Packet, DELETE_OPCODE, GET_OPCODE, MAGIC_RESPONSE, SET_OPCODE};
    use tokio::io::duplex;

    /// Build a response packet with the given opcode/key/value, status
    /// `NoError` (`vbucket_or_status == 0`).
    fn response_packet(opcode: u8, key: &[u8], value: Vec<u8>) -> Packet {
        Packet {
            header: Header {
                magic: MAGIC_RESPONSE,
                opcode,
                key_length: key.len() as u16,
                extras_length: 0,
                data_type: 0,
                vbucket_or_status: 0,
                body_len: (key.len() + value.len()) as u32,
                opaque: 0,
                cas: 0,
            },
            extras: Vec::new(),
            key: key.to_vec(),
            value,
        }
    }

    /// A minimal fake "server" that reads one request header+body at a
    /// time and replies with a canned response built by `respond`.
    async fn fake_server<F>(mut io: tokio::io::DuplexStream, mut respond: F)
    where
        F: FnMut(Packet) -> Vec<Packet>,
    {
        loop {
            let mut header_buf = [0_u8; HEADER_LENGTH];
            if io.read_exact(&mut header_buf).await.is_err() {
                break;
            }
            let header = match Header::read_request(&header_buf) {
                Ok(h) => h,
                Err(_) => break,
            };
            let mut body = vec![0_u8; header.body_len as usize];
            if !body.is_empty() && io.read_exact(&mut body).await.is_err() {
                break;
            }
            let request = Packet::from_response(header, &body).unwrap();
            for response in respond(request) {
                if io.write_all(&response.into_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn pipelines_three_single_commands_in_order() {
        let (client_io, server_io) = duplex(4096);
        tokio::spawn(fake_server(server_io, |req| {
            vec![response_packet(req.header.opcode, &req.key, Vec::new())]
        }));

        let channel = Channel::connect("test".to_string(), client_io, 32 * 1024);

        let c1 = SingleCommand::new(Packet::set(b"a", b"1".to_vec(), 0, 0).into_bytes(), SET_OPCODE);
        let c2 = SingleCommand::new(Packet::set(b"b", b"1".to_vec(), 0, 0).into_bytes(), SET_OPCODE);
        let c3 = SingleCommand::new(Packet::set(b"c", b"1".to_vec(), 0, 0).into_bytes(), SET_OPCODE);

        let r1 = channel
            .send(Command::Single(c1), Duration::from_millis(500))
            .await
            .unwrap();
        let r2 = channel
            .send(Command::Single(c2), Duration::from_millis(500))
            .await
            .unwrap();
        let r3 = channel
            .send(Command::Single(c3), Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(1, r1.len());
        assert_eq!(1, r2.len());
        assert_eq!(1, r3.len());
    }

    #[tokio::test]
    async fn send_on_closed_channel_fails_immediately() {
        let (client_io, server_io) = duplex(4096);
        drop(server_io);
        let channel = Channel::connect("test".to_string(), client_io, 32 * 1024);
        channel.closed().await;
        let cmd = SingleCommand::new(Packet::delete(b"a").into_bytes(), DELETE_OPCODE);
        let result = channel.send(Command::Single(cmd), Duration::from_millis(100)).await;
        assert_eq!(Err(ChannelError::Closed), result);
    }

    #[tokio::test]
    async fn get_deduplication_writes_one_frame_for_k_commands() {
        let (client_io, server_io) = duplex(4096);
        let seen = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen_clone = seen.clone();
        tokio::spawn(fake_server(server_io, move |req| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            vec![response_packet(GET_OPCODE, &req.key, b"shared".to_vec())]
        }));

        let channel = Channel::connect("test".to_string(), client_io, 32 * 1024);
        let commands: Vec<_> = (0..4).map(|_| GetCommand::new(b"same_key".to_vec())).collect();
        let mut handles = Vec::new();
        for cmd in &commands {
            let channel = channel.clone();
            let cmd = cmd.clone();
            handles.push(tokio::spawn(async move {
                channel
                    .send(Command::Get(cmd), Duration::from_millis(500))
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(b"shared".to_vec(), result[0].value);
        }
    }
}
