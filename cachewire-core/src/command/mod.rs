//! Command objects: one per Memcached operation, each carrying its
//! request bytes, a completion signal, an opcode-matched receiver, and
//! (for GET) an optimizer hook that folds duplicate in-flight requests.
//! See spec.md §4.5.

mod get;
mod multi_get;
mod single;

pub use get::GetCommand;
pub use multi_get::MultiGetCommand;
pub use single::SingleCommand;

use crate::protocol::{Packet, ProtocolError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// The lifecycle of a command, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    AwaitingWrite,
    AwaitingResponse,
    Completed,
    Cancelled,
    TimedOut,
}

/// Shared state between a command's public handle and the channel's IO
/// worker. Guarded by a `Mutex` rather than split into separate atomics
/// because transitions must be observed together with the response list.
#[derive(Debug)]
pub struct Inner {
    pub state: CommandState,
    pub responses: Vec<Packet>,
    pub response_expected: bool,
}

impl Inner {
    pub fn new() -> Self {
        Inner {
            state: CommandState::AwaitingWrite,
            responses: Vec::new(),
            response_expected: true,
        }
    }
}

/// The object the channel's IO worker enqueues, writes, and delivers
/// responses to. Implemented by [`GetCommand`], [`MultiGetCommand`], and
/// [`SingleCommand`] (covering SET/ADD/DELETE/INCREMENT/DECREMENT/TOUCH).
pub trait QueuedCommand: Send + Sync {
    /// The complete frame bytes to write to the socket, or `None` if
    /// this command was folded into an earlier one (a GET shadow) and
    /// must not be written at all.
    fn request_bytes(&self) -> Option<&[u8]>;

    /// The opcode of the request this command issued, used to verify
    /// the matching response's opcode.
    fn opcode(&self) -> u8;

    /// Whether a response is still expected. A multi-key command flips
    /// this to `false` only once the response whose key equals the
    /// last-enqueued key has arrived.
    fn response_expected(&self) -> bool;

    /// Deliver a response. Verifies the opcode matches; mismatch is a
    /// protocol error and is fatal to the owning channel.
    fn receive(&self, response: Packet) -> Result<(), ProtocolError>;

    /// Release all waiters with an empty result, e.g. on channel close.
    fn cancel(&self);

    /// Downcast hook for the GET write-side optimizer. `None` for
    /// every command type except [`GetCommand`].
    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        None
    }
}

/// A per-batch deduplication hook: a later GET for the same key can
/// share an earlier, still-pending GET's response instead of being
/// written to the socket a second time.
pub trait Optimizable: QueuedCommand {
    /// Byte-for-byte key used for folding comparisons.
    fn key(&self) -> &[u8];

    /// Try to absorb `candidate` as a shadow of `self`. Returns `true`
    /// (and records the shadow) only if `self` is still pending in the
    /// current flush batch and the keys match exactly.
    fn optimize(&self, candidate: Arc<GetCommand>) -> bool;
}

/// The concrete command enqueued on a [`crate::channel::Channel`]. An
/// enum rather than a trait object so the IO worker can recover the
/// concrete `Arc<GetCommand>` needed to drive the write-side optimizer
/// (folding requires calling `GetCommand::optimize` with an owned
/// handle to the candidate, which a `dyn QueuedCommand` cannot provide).
pub enum Command {
    Get(Arc<GetCommand>),
    MultiGet(Arc<MultiGetCommand>),
    Single(Arc<SingleCommand>),
}

impl Command {
    pub fn request_bytes(&self) -> Option<&[u8]> {
        match self {
            Command::Get(cmd) => cmd.request_bytes(),
            Command::MultiGet(cmd) => cmd.request_bytes(),
            Command::Single(cmd) => cmd.request_bytes(),
        }
    }

    pub fn response_expected(&self) -> bool {
        match self {
            Command::Get(cmd) => cmd.response_expected(),
            Command::MultiGet(cmd) => cmd.response_expected(),
            Command::Single(cmd) => cmd.response_expected(),
        }
    }

    pub fn receive(&self, response: Packet) -> Result<(), ProtocolError> {
        match self {
            Command::Get(cmd) => cmd.receive(response),
            Command::MultiGet(cmd) => cmd.receive(response),
            Command::Single(cmd) => cmd.receive(response),
        }
    }

    pub fn cancel(&self) {
        match self {
            Command::Get(cmd) => cmd.cancel(),
            Command::MultiGet(cmd) => cmd.cancel(),
            Command::Single(cmd) => cmd.cancel(),
        }
    }

    pub async fn await_responses(&self, timeout: Duration) -> Result<Vec<Packet>, AwaitError> {
        match self {
            Command::Get(cmd) => cmd.await_responses(timeout).await,
            Command::MultiGet(cmd) => cmd.await_responses(timeout).await,
            Command::Single(cmd) => cmd.await_responses(timeout).await,
        }
    }

    /// Ask every already-batched GET whether it will absorb `self` as a
    /// shadow. Only meaningful when `self` is itself a `Command::Get`;
    /// every other variant is never optimizable and returns `false`.
    fn try_fold_into(&self, primaries: &[Arc<GetCommand>]) -> bool {
        match self {
            Command::Get(candidate) => primaries
                .iter()
                .any(|primary| primary.optimize(candidate.clone())),
            _ => false,
        }
    }
}

impl From<Arc<GetCommand>> for Command {
    fn from(cmd: Arc<GetCommand>) -> Self {
        Command::Get(cmd)
    }
}

impl From<Arc<MultiGetCommand>> for Command {
    fn from(cmd: Arc<MultiGetCommand>) -> Self {
        Command::MultiGet(cmd)
    }
}

impl From<Arc<SingleCommand>> for Command {
    fn from(cmd: Arc<SingleCommand>) -> Self {
        Command::Single(cmd)
    }
}

/// Apply the write-side optimizer across one flush batch: each GET is
/// tested against the GET primaries already accepted into this batch,
/// in order. Returns the subset of `batch` that should actually be
/// written to the wire (shadows are dropped from the result but remain
/// reachable through their primary and are completed when it is).
pub(crate) fn dedup_batch(batch: Vec<Command>) -> Vec<Command> {
    let mut primaries: Vec<Arc<GetCommand>> = Vec::new();
    let mut to_write = Vec::with_capacity(batch.len());
    for cmd in batch {
        if cmd.try_fold_into(&primaries) {
            continue;
        }
        if let Command::Get(get) = &cmd {
            primaries.push(get.clone());
        }
        to_write.push(cmd);
    }
    to_write
}

/// Block the calling task until the command completes, is cancelled, or
/// `timeout` elapses (a timeout is itself an error, per spec.md §4.5).
pub(crate) async fn await_responses(
    inner: &Mutex<Inner>,
    notify: &Notify,
    timeout: Duration,
) -> Result<Vec<Packet>, AwaitError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        // Register interest in the next notification, and `enable()` it,
        // before inspecting the state. `notify_waiters()` stores no
        // permit, so a wakeup that lands between the state check and the
        // first poll of `notified` would otherwise be lost and the
        // caller would block to its full deadline (per tokio::sync::Notify's
        // documented usage pattern).
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let guard = inner.lock().unwrap();
            match guard.state {
                CommandState::Completed => return Ok(guard.responses.clone()),
                CommandState::Cancelled => return Ok(Vec::new()),
                CommandState::TimedOut => return Err(AwaitError::Timeout),
                CommandState::AwaitingWrite | CommandState::AwaitingResponse => {}
            }
        }
        match tokio::time::timeout_at(deadline, notified).await {
            Ok(()) => continue,
            Err(_) => {
                let mut guard = inner.lock().unwrap();
                if guard.state == CommandState::AwaitingWrite
                    || guard.state == CommandState::AwaitingResponse
                {
                    guard.state = CommandState::TimedOut;
                }
                return Err(AwaitError::Timeout);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AwaitError {
    Timeout,
}
