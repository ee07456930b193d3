use super::{await_responses, AwaitError, CommandState, Inner, QueuedCommand};
use crate::protocol::{Packet, ProtocolError, GETKQ_OPCODE, GETK_OPCODE};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// A multi-key GET built from an ordered key list of length N: one
/// GETKQ frame per key except the last, which is a GETK. The command
/// completes when a response arrives whose key equals the stored last
/// key (spec.md §4.5, Testable Property #4).
#[derive(Debug)]
pub struct MultiGetCommand {
    bytes: Vec<u8>,
    last_key: Vec<u8>,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MultiGetCommand {
    /// `keys` must be non-empty.
    pub fn new(keys: &[Vec<u8>]) -> Self {
        let (last, rest) = keys.split_last().expect("multi_get requires at least one key");
        let mut bytes = Vec::new();
        for key in rest {
            bytes.extend(Packet::getkq(key).into_bytes());
        }
        bytes.extend(Packet::getk(last).into_bytes());
        MultiGetCommand {
            bytes,
            last_key: last.clone(),
            inner: Mutex::new(Inner::new()),
            notify: Notify::new(),
        }
    }

    pub async fn await_responses(&self, timeout: Duration) -> Result<Vec<Packet>, AwaitError> {
        await_responses(&self.inner, &self.notify, timeout).await
    }
}

impl QueuedCommand for MultiGetCommand {
    fn request_bytes(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn opcode(&self) -> u8 {
        GETK_OPCODE
    }

    fn response_expected(&self) -> bool {
        self.inner.lock().unwrap().response_expected
    }

    fn receive(&self, response: Packet) -> Result<(), ProtocolError> {
        if response.header.opcode != GETKQ_OPCODE && response.header.opcode != GETK_OPCODE {
            return Err(ProtocolError::OpcodeMismatch {
                expected: GETK_OPCODE,
                actual: response.header.opcode,
            });
        }
        let mut guard = self.inner.lock().unwrap();
        let is_last = response.key == self.last_key;
        guard.responses.push(response);
        if is_last {
            guard.response_expected = false;
            guard.state = CommandState::Completed;
        }
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
