//! Object <-> wire-bytes transcoding: a 4-byte flags header, LZF
//! compression above a configured threshold, and the numeric-ASCII
//! decode path used by incr/decr responses. See spec.md §4.4.

use crate::protocol::ProtocolError;
use serde::{de::DeserializeOwned, Serialize};

/// Flags byte 0: transcoder version. `1` means "bincode-serialized
/// payload, optionally LZF-compressed (flags[1])". `0` means "ASCII
/// decimal integer", which is how memcached itself stores incr/decr
/// results and is never produced by [`encode`] -- only consumed by
/// [`decode_numeric`].
const FLAG_SERIALIZED: u8 = 1;
const COMPRESSED_BIT: u8 = 1;

/// Encode a value for storage: bincode-serialize, then LZF-compress if
/// the serialized form exceeds `compression_threshold`. Returns the
/// 4-byte extras flags and the (possibly compressed) body.
pub fn encode<V: Serialize + ?Sized>(
    value: &V,
    compression_threshold: usize,
) -> bincode::Result<([u8; 4], Vec<u8>)> {
    let body = bincode::serialize(value)?;
    let mut flags = [0_u8; 4];
    flags[0] = FLAG_SERIALIZED;

    if body.len() > compression_threshold {
        let pre_len = body.len();
        if let Ok(compressed) = lzf::compress(&body) {
            if compressed.len() < pre_len {
                log::trace!(
                    "cachewire: compressed value {} -> {} bytes",
                    pre_len,
                    compressed.len()
                );
                flags[1] = COMPRESSED_BIT;
                return Ok((flags, compressed));
            }
        }
    }

    Ok((flags, body))
}

/// Decode a response body using its extras flags. `flags[0] == 1`
/// deserializes a (possibly LZF-compressed) object; `flags[0] == 0`
/// parses the payload as an ASCII decimal integer (the incr/decr
/// representation memcached itself uses on disk). Any other value in
/// `flags[0]` is a protocol error.
pub fn decode<V: DeserializeOwned>(flags: &[u8], value: &[u8]) -> Result<V, DecodeError> {
    let flag0 = flags.first().copied().unwrap_or(0);
    match flag0 {
        FLAG_SERIALIZED => {
            let compressed = flags.get(1).copied().unwrap_or(0) & COMPRESSED_BIT != 0;
            let bytes = if compressed {
                lzf::decompress(value, value.len() * 16).map_err(|_| DecodeError::Lzf)?
            } else {
                value.to_vec()
            };
            bincode::deserialize(&bytes).map_err(DecodeError::Bincode)
        }
        0 => Err(DecodeError::NotAnObject),
        other => Err(DecodeError::Protocol(ProtocolError::UnsupportedFlags(other))),
    }
}

/// Decode a response body that is known to carry an incr/decr result:
/// an ASCII decimal integer, parsed while bytes fall in `0x30..=0x39`.
pub fn decode_numeric(value: &[u8]) -> Result<u64, DecodeError> {
    let mut digits = String::with_capacity(value.len());
    for &byte in value {
        if (0x30..=0x39).contains(&byte) {
            digits.push(byte as char);
        } else {
            break;
        }
    }
    digits.parse::<u64>().map_err(|_| DecodeError::NotNumeric)
}

#[derive(Debug)]
pub enum DecodeError {
    Bincode(bincode::Error),
    Lzf,
    NotNumeric,
    /// `decode` was called but the payload is flagged numeric; callers
    /// that expect numeric payloads should use [`decode_numeric`] instead.
    NotAnObject,
    Protocol(ProtocolError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Bincode(err) => write!(f, "{}", err),
            DecodeError::Lzf => write!(f, "LZF decompression failed"),
            DecodeError::NotNumeric => write!(f, "value is not an ASCII decimal integer"),
            DecodeError::NotAnObject => write!(f, "value is flagged as numeric, not an object"),
            DecodeError::Protocol(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DecodeError {}
