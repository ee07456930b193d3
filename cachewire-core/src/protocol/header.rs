use crate::byte_codec::{pack_u16_be, pack_u32_be, pack_u64_be, pack_u8, unpack_u16_be, unpack_u32_be, unpack_u64_be, unpack_u8};
use crate::protocol::status::ProtocolError;

pub const HEADER_LENGTH: usize = 24;
pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// The fixed 24-byte header shared by every request and response frame.
/// Field offsets (per spec.md §6): 0 magic, 1 opcode, 2-3 key length,
/// 4 extras length, 5 data type, 6-7 vbucket/status, 8-11 total body
/// length, 12-15 opaque, 16-23 CAS.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn write(&self, buf: &mut [u8; HEADER_LENGTH]) {
        pack_u8(buf, 0, self.magic);
        pack_u8(buf, 1, self.opcode);
        pack_u16_be(buf, 2, self.key_length);
        pack_u8(buf, 4, self.extras_length);
        pack_u8(buf, 5, self.data_type);
        pack_u16_be(buf, 6, self.vbucket_or_status);
        // Open Question #1: always write the 4-byte length field, even
        // when the body is empty -- zero is a valid encoding.
        pack_u32_be(buf, 8, self.body_len);
        pack_u32_be(buf, 12, self.opaque);
        pack_u64_be(buf, 16, self.cas);
    }

    /// Parse a request header (magic byte 0x80). Used by tests that
    /// verify a builder's own output round-trips (Testable Property #1).
    pub fn read_request(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::read(bytes, MAGIC_REQUEST)
    }

    /// Parse a response header (magic byte 0x81).
    pub fn read_response(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::read(bytes, MAGIC_RESPONSE)
    }

    fn read(bytes: &[u8], expect_magic: u8) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(ProtocolError::PacketTooSmall);
        }
        let magic = unpack_u8(bytes, 0);
        if magic != expect_magic {
            return Err(ProtocolError::InvalidMagic(magic));
        }
        Ok(Header {
            magic,
            opcode: unpack_u8(bytes, 1),
            key_length: unpack_u16_be(bytes, 2),
            extras_length: unpack_u8(bytes, 4),
            data_type: unpack_u8(bytes, 5),
            vbucket_or_status: unpack_u16_be(bytes, 6),
            body_len: unpack_u32_be(bytes, 8),
            opaque: unpack_u32_be(bytes, 12),
            cas: unpack_u64_be(bytes, 16),
        })
    }

    /// `value_length = total_body_length - extras - key`, per spec.md §4.3.
    pub fn value_length(&self) -> usize {
        self.body_len as usize - self.extras_length as usize - self.key_length as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_body_still_writes_length_bytes() {
        let header = Header {
            magic: MAGIC_REQUEST,
            opcode: 0,
            ..Default::default()
        };
        let mut buf = [0_u8; HEADER_LENGTH];
        header.write(&mut buf);
        assert_eq!([0, 0, 0, 0], buf[8..12]);
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(
            Err(ProtocolError::PacketTooSmall),
            Header::read_response(&[0_u8; 10])
        );
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = [0_u8; HEADER_LENGTH];
        buf[0] = 0x80;
        assert_eq!(
            Err(ProtocolError::InvalidMagic(0x80)),
            Header::read_response(&buf)
        );
    }
}
