use crate::byte_codec::{pack_u32_be, pack_u64_be};
use crate::protocol::header::{Header, HEADER_LENGTH, MAGIC_REQUEST, MAGIC_RESPONSE};
use crate::protocol::status::{ProtocolError, Status};

pub const GET_OPCODE: u8 = 0x00;
pub const SET_OPCODE: u8 = 0x01;
pub const ADD_OPCODE: u8 = 0x02;
pub const DELETE_OPCODE: u8 = 0x04;
pub const INCREMENT_OPCODE: u8 = 0x05;
pub const DECREMENT_OPCODE: u8 = 0x06;
pub const NOOP_OPCODE: u8 = 0x0a;
pub const GETK_OPCODE: u8 = 0x0c;
pub const GETKQ_OPCODE: u8 = 0x0d;
pub const TOUCH_OPCODE: u8 = 0x1c;

/// A complete protocol frame: header plus the three body segments in
/// wire order (extras, key, value).
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Packet {
    pub header: Header,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Packet {
    fn new(magic: u8, opcode: u8, extras: Vec<u8>, key: Vec<u8>, value: Vec<u8>) -> Self {
        let header = Header {
            magic,
            opcode,
            key_length: key.len() as u16,
            extras_length: extras.len() as u8,
            data_type: 0,
            vbucket_or_status: 0,
            body_len: (extras.len() + key.len() + value.len()) as u32,
            opaque: 0,
            cas: 0,
        };
        Packet {
            header,
            extras,
            key,
            value,
        }
    }

    fn new_request(opcode: u8, extras: Vec<u8>, key: &[u8], value: Vec<u8>) -> Self {
        Self::new(MAGIC_REQUEST, opcode, extras, key.to_vec(), value)
    }

    /// Parse a response body, given the already-parsed header. The
    /// caller is responsible for having read exactly `header.body_len`
    /// bytes from the stream.
    pub fn from_response(header: Header, body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() != header.body_len as usize {
            return Err(ProtocolError::BodySizeMismatch);
        }
        let (extras, rest) = body.split_at(header.extras_length as usize);
        let (key, value) = rest.split_at(header.key_length as usize);
        Ok(Packet {
            header,
            extras: extras.to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    pub fn get(key: &[u8]) -> Self {
        Self::new_request(GET_OPCODE, Vec::new(), key, Vec::new())
    }

    pub fn getk(key: &[u8]) -> Self {
        Self::new_request(GETK_OPCODE, Vec::new(), key, Vec::new())
    }

    pub fn getkq(key: &[u8]) -> Self {
        Self::new_request(GETKQ_OPCODE, Vec::new(), key, Vec::new())
    }

    pub fn set(key: &[u8], value: Vec<u8>, flags: u32, expire: u32) -> Self {
        Self::new_request(SET_OPCODE, set_extras(flags, expire), key, value)
    }

    pub fn add(key: &[u8], value: Vec<u8>, flags: u32, expire: u32) -> Self {
        Self::new_request(ADD_OPCODE, set_extras(flags, expire), key, value)
    }

    pub fn delete(key: &[u8]) -> Self {
        Self::new_request(DELETE_OPCODE, Vec::new(), key, Vec::new())
    }

    pub fn increment(key: &[u8], delta: u64, initial: u64, expire: u32) -> Self {
        Self::new_request(
            INCREMENT_OPCODE,
            incr_decr_extras(delta, initial, expire),
            key,
            Vec::new(),
        )
    }

    pub fn decrement(key: &[u8], delta: u64, initial: u64, expire: u32) -> Self {
        Self::new_request(
            DECREMENT_OPCODE,
            incr_decr_extras(delta, initial, expire),
            key,
            Vec::new(),
        )
    }

    pub fn touch(key: &[u8], expire: u32) -> Self {
        let mut extras = vec![0_u8; 4];
        pack_u32_be(&mut extras, 0, expire);
        Self::new_request(TOUCH_OPCODE, extras, key, Vec::new())
    }

    pub fn noop() -> Self {
        Self::new_request(NOOP_OPCODE, Vec::new(), b"", Vec::new())
    }

    /// `Ok(())` when the response status is `NoError`, otherwise the
    /// mapped [`Status`].
    pub fn error_for_status(&self) -> Result<(), Status> {
        match self.header.vbucket_or_status {
            0 => Ok(()),
            code => Err(Status::from(code)),
        }
    }

    /// Check that this response's opcode matches the opcode of the
    /// request it is meant to answer. Mismatch is a protocol desync.
    pub fn verify_opcode(&self, expected: u8) -> Result<(), ProtocolError> {
        if self.header.opcode == expected {
            Ok(())
        } else {
            Err(ProtocolError::OpcodeMismatch {
                expected,
                actual: self.header.opcode,
            })
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut header_buf = [0_u8; HEADER_LENGTH];
        self.header.write(&mut header_buf);
        let mut out = Vec::with_capacity(HEADER_LENGTH + self.extras.len() + self.key.len() + self.value.len());
        out.extend_from_slice(&header_buf);
        out.extend_from_slice(&self.extras);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
        out
    }
}

fn set_extras(flags: u32, expire: u32) -> Vec<u8> {
    let mut extras = vec![0_u8; 8];
    pack_u32_be(&mut extras, 0, flags);
    pack_u32_be(&mut extras, 4, expire);
    extras
}

fn incr_decr_extras(delta: u64, initial: u64, expire: u32) -> Vec<u8> {
    let mut extras = vec![0_u8; 20];
    pack_u64_be(&mut extras, 0, delta);
    pack_u64_be(&mut extras, 8, initial);
    pack_u32_be(&mut extras, 16, expire);
    extras
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Testable Property #1: parsing a request builder's own output as
    /// a response header (swapping the magic byte) yields matching
    /// opcode, key length, extras length, and total body length.
    fn assert_round_trips(packet: Packet) {
        let opcode = packet.header.opcode;
        let key_length = packet.header.key_length;
        let extras_length = packet.header.extras_length;
        let body_len = packet.header.body_len;

        let mut bytes = packet.into_bytes();
        bytes[0] = MAGIC_RESPONSE;
        let header = Header::read_response(&bytes).unwrap();
        assert_eq!(opcode, header.opcode);
        assert_eq!(key_length, header.key_length);
        assert_eq!(extras_length, header.extras_length);
        assert_eq!(body_len, header.body_len);
    }

    #[test]
    fn get_round_trips() {
        assert_round_trips(Packet::get(b"demo_key"));
    }

    #[test]
    fn set_round_trips() {
        assert_round_trips(Packet::set(b"demo_key", b"Hello world!".to_vec(), 0, 60));
    }

    #[test]
    fn increment_round_trips() {
        assert_round_trips(Packet::increment(b"counter", 3, 0, 60));
    }

    #[test]
    fn touch_round_trips() {
        assert_round_trips(Packet::touch(b"demo_key", 60));
    }

    #[test]
    fn delete_round_trips() {
        assert_round_trips(Packet::delete(b"demo_key"));
    }

    #[test]
    fn github_add_example_matches_known_bytes() {
        let mut extras = vec![0_u8; 8];
        pack_u32_be(&mut extras, 0, 0xdeadbeef);
        pack_u32_be(&mut extras, 4, 0x1c20);
        let packet = Packet::new_request(ADD_OPCODE, extras, b"Hello", b"World".to_vec());
        let expect_bytes = vec![
            0x80, 0x02, 0x00, 0x05, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef,
            0x00, 0x00, 0x1c, 0x20, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x57, 0x6f, 0x72, 0x6c, 0x64,
        ];
        assert_eq!(expect_bytes, packet.into_bytes());
    }

    #[test]
    fn value_length_subtracts_extras_and_key() {
        let header = Header {
            magic: MAGIC_RESPONSE,
            opcode: GET_OPCODE,
            key_length: 3,
            extras_length: 4,
            body_len: 10,
            ..Default::default()
        };
        assert_eq!(3, header.value_length());
    }

    #[test]
    fn verify_opcode_mismatch_is_protocol_error() {
        let packet = Packet::get(b"k");
        assert_eq!(
            Err(ProtocolError::OpcodeMismatch {
                expected: SET_OPCODE,
                actual: GET_OPCODE,
            }),
            packet.verify_opcode(SET_OPCODE)
        );
    }
}
