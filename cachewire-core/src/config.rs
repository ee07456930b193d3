//! Configuration option defaults recognized by the client, reproduced
//! as Rust constants. See spec.md §6.

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SEND_BUFFER: usize = 32 * 1024;
pub const DEFAULT_RECEIVE_BUFFER: usize = 32 * 1024;
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 65_536;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 1_000;
