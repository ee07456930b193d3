//! The Memcached binary protocol: 24-byte headers, per-opcode request
//! builders, and response status mapping. See spec.md §4.3/§6.

mod header;
mod packet;
mod status;

pub use header::{Header, HEADER_LENGTH, MAGIC_REQUEST, MAGIC_RESPONSE};
pub use packet::{
    Packet, ADD_OPCODE, DECREMENT_OPCODE, DELETE_OPCODE, GETKQ_OPCODE, GETK_OPCODE, GET_OPCODE,
    INCREMENT_OPCODE, NOOP_OPCODE, SET_OPCODE, TOUCH_OPCODE,
};
pub use status::{ProtocolError, Status};
