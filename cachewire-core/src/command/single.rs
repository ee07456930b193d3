use super::{await_responses, AwaitError, CommandState, Inner, QueuedCommand};
use crate::protocol::{Packet, ProtocolError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A single-reply command: SET, ADD, DELETE, INCREMENT, DECREMENT, or
/// TOUCH. GETKQ/GETK framing for multi-key reads is handled separately
/// by [`super::MultiGetCommand`]; a solitary GET uses [`super::GetCommand`]
/// instead so it can participate in write-side deduplication.
#[derive(Debug)]
pub struct SingleCommand {
    bytes: Vec<u8>,
    opcode: u8,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SingleCommand {
    pub fn new(bytes: Vec<u8>, opcode: u8) -> Arc<Self> {
        Arc::new(SingleCommand {
            bytes,
            opcode,
            inner: Mutex::new(Inner::new()),
            notify: Notify::new(),
        })
    }

    pub async fn await_responses(&self, timeout: Duration) -> Result<Vec<Packet>, AwaitError> {
        await_responses(&self.inner, &self.notify, timeout).await
    }
}

impl QueuedCommand for SingleCommand {
    fn request_bytes(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn opcode(&self) -> u8 {
        self.opcode
    }

    fn response_expected(&self) -> bool {
        self.inner.lock().unwrap().response_expected
    }

    fn receive(&self, response: Packet) -> Result<(), ProtocolError> {
        response.verify_opcode(self.opcode)?;
        let mut guard = self.inner.lock().unwrap();
        guard.responses.push(response);
        guard.response_expected = false;
        guard.state = CommandState::Completed;
        drop(guard);
        self.notify.notify_waiters();
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
    }
}
