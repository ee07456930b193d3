use std::fmt::{Display, Formatter, Result as FmtResult};

/// Response status codes as defined by the Memcached binary protocol.
/// `NoError` means the request succeeded; every other value is a
/// failure and carries a fixed error message via [`Status::message`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    IncrDecrOnNonNumericValue,
    VbucketBelongsToAnotherServer,
    AuthenticationError,
    AuthenticationContinue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    /// A status code the protocol does not define. Carries the raw
    /// value so the synthesized message can include it.
    Unknown(u16),
}

impl From<u16> for Status {
    fn from(val: u16) -> Self {
        match val {
            0x00 => Status::NoError,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::ValueTooLarge,
            0x04 => Status::InvalidArguments,
            0x05 => Status::ItemNotStored,
            0x06 => Status::IncrDecrOnNonNumericValue,
            0x07 => Status::VbucketBelongsToAnotherServer,
            0x08 => Status::AuthenticationError,
            0x09 => Status::AuthenticationContinue,
            0x81 => Status::UnknownCommand,
            0x82 => Status::OutOfMemory,
            0x83 => Status::NotSupported,
            0x84 => Status::InternalError,
            0x85 => Status::Busy,
            0x86 => Status::TemporaryFailure,
            other => Status::Unknown(other),
        }
    }
}

impl Status {
    /// The fixed error-string table from the protocol spec. Unknown
    /// codes synthesize "Unknown error. Status: hi, lo" from the two
    /// bytes of the status field.
    pub fn message(&self) -> String {
        match self {
            Status::NoError => "No error".to_string(),
            Status::KeyNotFound => "Key not found".to_string(),
            Status::KeyExists => "Key exists".to_string(),
            Status::ValueTooLarge => "Value too large".to_string(),
            Status::InvalidArguments => "Invalid arguments".to_string(),
            Status::ItemNotStored => "Item not stored".to_string(),
            Status::IncrDecrOnNonNumericValue => {
                "Incr/Decr on non-numeric value".to_string()
            }
            Status::VbucketBelongsToAnotherServer => "Wrong vbucket".to_string(),
            Status::AuthenticationError => "Auth error".to_string(),
            Status::AuthenticationContinue => "Auth continue".to_string(),
            Status::UnknownCommand => "Unknown command".to_string(),
            Status::OutOfMemory => "Out of memory".to_string(),
            Status::NotSupported => "Not supported".to_string(),
            Status::InternalError => "Internal error".to_string(),
            Status::Busy => "Busy".to_string(),
            Status::TemporaryFailure => "Temporary failure".to_string(),
            Status::Unknown(code) => {
                let hi = (code >> 8) as u8;
                let lo = (code & 0xff) as u8;
                format!("Unknown error. Status: {}, {}", hi, lo)
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::NoError)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Status {}

/// Errors caused by incorrectly implementing (or desyncing from) the
/// binary protocol. All variants are fatal to the owning [`crate::channel::Channel`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    InvalidMagic(u8),
    PacketTooSmall,
    BodySizeMismatch,
    /// The response opcode did not match the request that was awaiting it.
    OpcodeMismatch { expected: u8, actual: u8 },
    /// Transcoder flags byte 0 was neither 0 (numeric) nor 1 (serialized).
    UnsupportedFlags(u8),
    /// The remote closed the stream cleanly before a full header arrived.
    StreamClosed,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolError::InvalidMagic(m) => write!(f, "Invalid magic byte: {}", m),
            ProtocolError::PacketTooSmall => write!(f, "Packet too small"),
            ProtocolError::BodySizeMismatch => write!(f, "Body size does not match header"),
            ProtocolError::OpcodeMismatch { expected, actual } => write!(
                f,
                "Response opcode {} did not match request opcode {}",
                actual, expected
            ),
            ProtocolError::UnsupportedFlags(flags) => {
                write!(f, "Unsupported transcoder flags: {}", flags)
            }
            ProtocolError::StreamClosed => write!(f, "Stream closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_message_includes_hi_lo() {
        let status = Status::from(0x0102);
        assert_eq!("Unknown error. Status: 1, 2", status.message());
    }

    #[test]
    fn known_codes_round_trip_from_u16() {
        assert_eq!(Status::KeyNotFound, Status::from(0x01));
        assert_eq!(Status::Busy, Status::from(0x85));
        assert_eq!(Status::TemporaryFailure, Status::from(0x86));
    }
}
