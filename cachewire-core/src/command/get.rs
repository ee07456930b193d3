use super::{await_responses, AwaitError, CommandState, Inner, Optimizable, QueuedCommand};
use crate::protocol::{Packet, ProtocolError, GET_OPCODE};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A GET command. Participates in the channel's per-batch write-side
/// optimizer: a later GET for the same key folds into an earlier one
/// still pending in the same flush batch instead of being written to
/// the socket a second time (spec.md §4.5/§4.6, Testable Property #6).
#[derive(Debug)]
pub struct GetCommand {
    key: Vec<u8>,
    bytes: Vec<u8>,
    inner: Mutex<Inner>,
    notify: Notify,
    /// Set once this command has been folded into another as a shadow.
    /// A shadow is never written to the socket and never placed in the
    /// channel's `awaiting` FIFO; it is completed only by its primary.
    is_shadow: Mutex<bool>,
    shadows: Mutex<Vec<Arc<GetCommand>>>,
}

impl GetCommand {
    pub fn new(key: Vec<u8>) -> Arc<Self> {
        let bytes = Packet::get(&key).into_bytes();
        Arc::new(GetCommand {
            key,
            bytes,
            inner: Mutex::new(Inner::new()),
            notify: Notify::new(),
            is_shadow: Mutex::new(false),
            shadows: Mutex::new(Vec::new()),
        })
    }

    pub async fn await_responses(&self, timeout: Duration) -> Result<Vec<Packet>, AwaitError> {
        await_responses(&self.inner, &self.notify, timeout).await
    }

    pub fn is_shadow(&self) -> bool {
        *self.is_shadow.lock().unwrap()
    }

    fn deliver(&self, response: Packet) {
        let mut guard = self.inner.lock().unwrap();
        guard.responses.push(response);
        guard.response_expected = false;
        guard.state = CommandState::Completed;
        drop(guard);
        self.notify.notify_waiters();
    }
}

impl QueuedCommand for GetCommand {
    fn request_bytes(&self) -> Option<&[u8]> {
        if self.is_shadow() {
            None
        } else {
            Some(&self.bytes)
        }
    }

    fn opcode(&self) -> u8 {
        GET_OPCODE
    }

    fn response_expected(&self) -> bool {
        self.inner.lock().unwrap().response_expected
    }

    fn receive(&self, response: Packet) -> Result<(), ProtocolError> {
        response.verify_opcode(GET_OPCODE)?;
        self.deliver(response.clone());
        for shadow in self.shadows.lock().unwrap().iter() {
            shadow.deliver(response.clone());
        }
        Ok(())
    }

    fn cancel(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.state != CommandState::Completed {
            guard.state = CommandState::Cancelled;
            guard.response_expected = false;
        }
        drop(guard);
        self.notify.notify_waiters();
        for shadow in self.shadows.lock().unwrap().iter() {
            shadow.cancel();
        }
    }

    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        Some(self)
    }
}

impl Optimizable for GetCommand {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn optimize(&self, candidate: Arc<GetCommand>) -> bool {
        if self.is_shadow() || candidate.key != self.key {
            return false;
        }
        let still_pending = self.inner.lock().unwrap().state == CommandState::AwaitingWrite;
        if !still_pending {
            return false;
        }
        *candidate.is_shadow.lock().unwrap() = true;
        self.shadows.lock().unwrap().push(candidate);
        true
    }
}
