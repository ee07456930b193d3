//! Crate-wide error type shared between the channel, codec, and
//! transcoder layers. Never crosses the public `DirectClient`/
//! `ClusterClient` surface: those layers consume it fully and report
//! through a sentinel plus the listener (spec.md §7).

use crate::protocol::{ProtocolError, Status};
use crate::transcoder::DecodeError;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Bincode(bincode::Error),
    Status(Status),
    Validation(ValidationError),
    Timeout,
    Closed,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Protocol(err) => write!(f, "{}", err),
            Error::Bincode(err) => write!(f, "{}", err),
            Error::Status(status) => write!(f, "{}", status),
            Error::Validation(err) => write!(f, "{}", err),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Bincode(err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::Status(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Bincode(e) => Error::Bincode(e),
            DecodeError::Protocol(e) => Error::Protocol(e),
            DecodeError::Lzf | DecodeError::NotNumeric | DecodeError::NotAnObject => {
                Error::Validation(ValidationError::MalformedValue)
            }
        }
    }
}

/// Rejections the direct client makes before ever touching the wire
/// (spec.md §4.7's key/value size limits).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValidationError {
    EmptyKey,
    KeyTooLong { length: usize, max: usize },
    ValueTooLarge { length: usize, max: usize },
    NegativeExpiry(i64),
    NegativeInitialValue,
    EmptyKeyList,
    MalformedValue,
    NonPositiveTimeout,
    NonPositiveThreshold,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ValidationError::EmptyKey => write!(f, "key must not be empty"),
            ValidationError::KeyTooLong { length, max } => {
                write!(f, "key length {} exceeds maximum {}", length, max)
            }
            ValidationError::ValueTooLarge { length, max } => {
                write!(f, "value length {} exceeds maximum {}", length, max)
            }
            ValidationError::NegativeExpiry(value) => {
                write!(f, "expiry must not be negative, got {}", value)
            }
            ValidationError::NegativeInitialValue => write!(f, "initial value must not be negative"),
            ValidationError::EmptyKeyList => write!(f, "multi_get requires at least one key"),
            ValidationError::MalformedValue => write!(f, "value could not be decoded"),
            ValidationError::NonPositiveTimeout => write!(f, "read_timeout_ms must be positive"),
            ValidationError::NonPositiveThreshold => {
                write!(f, "compression_threshold_bytes must be positive")
            }
        }
    }
}

impl std::error::Error for ValidationError {}
