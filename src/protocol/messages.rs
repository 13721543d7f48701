//! Wire formats
//!
//! All integers are little-endian. Decoding is all-or-nothing: a buffer
//! that is too short or carries the wrong type byte yields an error and
//! no partially filled message.
//!
//! - Type 1: Handshake Initiation (148 bytes)
//! - Type 2: Handshake Response (92 bytes)
//! - Type 3: Cookie Reply (64 bytes)
//! - Type 4: Transport Data (16-byte header + at least a 16-byte tag)

use crate::crypto::aead::TAG_LEN;
use crate::error::ProtocolError;

/// WireGuard message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HandshakeInitiation = 1,
    HandshakeResponse = 2,
    CookieReply = 3,
    TransportData = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HandshakeInitiation),
            2 => Ok(Self::HandshakeResponse),
            3 => Ok(Self::CookieReply),
            4 => Ok(Self::TransportData),
            _ => Err(ProtocolError::InvalidMessageType { msg_type: value }),
        }
    }
}

/// Copy `N` bytes starting at `offset`; callers have checked the length
fn array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

fn check_header(data: &[u8], size: usize, msg_type: MessageType) -> Result<(), ProtocolError> {
    if data.len() < size {
        return Err(ProtocolError::InvalidMessageLength {
            expected: size,
            got: data.len(),
        });
    }
    if data[0] != msg_type as u8 {
        return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
    }
    Ok(())
}

/// Handshake messages carrying mac1/mac2 trailers
pub trait MacMessage {
    /// Encoded size
    const SIZE: usize;

    /// Offset of mac1; mac2 follows at `MAC1_OFFSET + 16`
    const MAC1_OFFSET: usize;

    fn encode(&self) -> Vec<u8>;

    fn mac1(&self) -> &[u8; 16];

    fn mac2(&self) -> &[u8; 16];

    fn set_mac1(&mut self, mac1: [u8; 16]);

    fn set_mac2(&mut self, mac2: [u8; 16]);
}

/// Handshake Initiation message (148 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | ephemeral_public(32) |
/// encrypted_static(48) | encrypted_timestamp(28) | mac1(16) | mac2(16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInitiation {
    pub sender_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_static: [u8; 48],
    pub encrypted_timestamp: [u8; 28],
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeInitiation {
    pub const SIZE: usize = 148;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::HandshakeInitiation as u8;
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..40].copy_from_slice(&self.ephemeral_public);
        buf[40..88].copy_from_slice(&self.encrypted_static);
        buf[88..116].copy_from_slice(&self.encrypted_timestamp);
        buf[116..132].copy_from_slice(&self.mac1);
        buf[132..148].copy_from_slice(&self.mac2);

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_header(data, Self::SIZE, MessageType::HandshakeInitiation)?;

        Ok(Self {
            sender_index: u32::from_le_bytes(array(data, 4)),
            ephemeral_public: array(data, 8),
            encrypted_static: array(data, 40),
            encrypted_timestamp: array(data, 88),
            mac1: array(data, 116),
            mac2: array(data, 132),
        })
    }
}

impl MacMessage for HandshakeInitiation {
    const SIZE: usize = Self::SIZE;
    const MAC1_OFFSET: usize = 116;

    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn mac1(&self) -> &[u8; 16] {
        &self.mac1
    }

    fn mac2(&self) -> &[u8; 16] {
        &self.mac2
    }

    fn set_mac1(&mut self, mac1: [u8; 16]) {
        self.mac1 = mac1;
    }

    fn set_mac2(&mut self, mac2: [u8; 16]) {
        self.mac2 = mac2;
    }
}

/// Handshake Response message (92 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | receiver_index(4) |
/// ephemeral_public(32) | encrypted_nothing(16) | mac1(16) | mac2(16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub sender_index: u32,
    pub receiver_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_nothing: [u8; 16],
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeResponse {
    pub const SIZE: usize = 92;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::HandshakeResponse as u8;
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..12].copy_from_slice(&self.receiver_index.to_le_bytes());
        buf[12..44].copy_from_slice(&self.ephemeral_public);
        buf[44..60].copy_from_slice(&self.encrypted_nothing);
        buf[60..76].copy_from_slice(&self.mac1);
        buf[76..92].copy_from_slice(&self.mac2);

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_header(data, Self::SIZE, MessageType::HandshakeResponse)?;

        Ok(Self {
            sender_index: u32::from_le_bytes(array(data, 4)),
            receiver_index: u32::from_le_bytes(array(data, 8)),
            ephemeral_public: array(data, 12),
            encrypted_nothing: array(data, 44),
            mac1: array(data, 60),
            mac2: array(data, 76),
        })
    }
}

impl MacMessage for HandshakeResponse {
    const SIZE: usize = Self::SIZE;
    const MAC1_OFFSET: usize = 60;

    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn mac1(&self) -> &[u8; 16] {
        &self.mac1
    }

    fn mac2(&self) -> &[u8; 16] {
        &self.mac2
    }

    fn set_mac1(&mut self, mac1: [u8; 16]) {
        self.mac1 = mac1;
    }

    fn set_mac2(&mut self, mac2: [u8; 16]) {
        self.mac2 = mac2;
    }
}

/// Cookie Reply message (64 bytes)
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | nonce(24) | encrypted_cookie(32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieReply {
    pub receiver_index: u32,
    pub nonce: [u8; 24],
    pub encrypted_cookie: [u8; 32],
}

impl CookieReply {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::CookieReply as u8;
        buf[4..8].copy_from_slice(&self.receiver_index.to_le_bytes());
        buf[8..32].copy_from_slice(&self.nonce);
        buf[32..64].copy_from_slice(&self.encrypted_cookie);

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_header(data, Self::SIZE, MessageType::CookieReply)?;

        Ok(Self {
            receiver_index: u32::from_le_bytes(array(data, 4)),
            nonce: array(data, 8),
            encrypted_cookie: array(data, 32),
        })
    }
}

/// Transport Data message
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | counter(8) | encrypted_packet(n+16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportData {
    pub receiver_index: u32,
    pub counter: u64,
    pub encrypted_packet: Vec<u8>,
}

impl TransportData {
    /// Size of the header preceding the encrypted packet
    pub const HEADER_SIZE: usize = 16;

    /// Header plus an empty (keepalive) payload's tag
    pub const MIN_SIZE: usize = Self::HEADER_SIZE + TAG_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.encrypted_packet.len());

        buf.push(MessageType::TransportData as u8);
        buf.extend_from_slice(&[0, 0, 0]);
        buf.extend_from_slice(&self.receiver_index.to_le_bytes());
        buf.extend_from_slice(&self.counter.to_le_bytes());
        buf.extend_from_slice(&self.encrypted_packet);

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_header(data, Self::MIN_SIZE, MessageType::TransportData)?;

        Ok(Self {
            receiver_index: u32::from_le_bytes(array(data, 4)),
            counter: u64::from_le_bytes(array(data, 8)),
            encrypted_packet: data[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

/// Any inbound message, dispatched on the type byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HandshakeInitiation(HandshakeInitiation),
    HandshakeResponse(HandshakeResponse),
    CookieReply(CookieReply),
    TransportData(TransportData),
}

impl Message {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        match get_message_type(data)? {
            MessageType::HandshakeInitiation => {
                HandshakeInitiation::from_bytes(data).map(Self::HandshakeInitiation)
            }
            MessageType::HandshakeResponse => {
                HandshakeResponse::from_bytes(data).map(Self::HandshakeResponse)
            }
            MessageType::CookieReply => CookieReply::from_bytes(data).map(Self::CookieReply),
            MessageType::TransportData => TransportData::from_bytes(data).map(Self::TransportData),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::HandshakeInitiation(m) => m.to_bytes().to_vec(),
            Self::HandshakeResponse(m) => m.to_bytes().to_vec(),
            Self::CookieReply(m) => m.to_bytes().to_vec(),
            Self::TransportData(m) => m.to_bytes(),
        }
    }
}

/// Get the message type from a packet
pub fn get_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    match data.first() {
        Some(&msg_type) => MessageType::try_from(msg_type),
        None => Err(ProtocolError::InvalidMessageLength {
            expected: 1,
            got: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    fn random_array<const N: usize>() -> [u8; N] {
        let mut out = [0u8; N];
        rand::thread_rng().fill_bytes(&mut out);
        out
    }

    #[test]
    fn test_handshake_initiation_layout() {
        let init = HandshakeInitiation {
            sender_index: 0x12345678,
            ephemeral_public: [1u8; 32],
            encrypted_static: [2u8; 48],
            encrypted_timestamp: [3u8; 28],
            mac1: [4u8; 16],
            mac2: [5u8; 16],
        };

        let bytes = init.to_bytes();
        assert_eq!(bytes.len(), 148);
        assert_eq!(&bytes[..8], &[1, 0, 0, 0, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(bytes[8], 1);
        assert_eq!(bytes[40], 2);
        assert_eq!(bytes[88], 3);
        assert_eq!(bytes[116], 4);
        assert_eq!(bytes[147], 5);
    }

    #[test]
    fn test_random_messages_decode_to_themselves() {
        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let init = HandshakeInitiation {
                sender_index: rng.gen(),
                ephemeral_public: random_array(),
                encrypted_static: random_array(),
                encrypted_timestamp: random_array(),
                mac1: random_array(),
                mac2: random_array(),
            };
            assert_eq!(HandshakeInitiation::from_bytes(&init.to_bytes()).unwrap(), init);

            let resp = HandshakeResponse {
                sender_index: rng.gen(),
                receiver_index: rng.gen(),
                ephemeral_public: random_array(),
                encrypted_nothing: random_array(),
                mac1: random_array(),
                mac2: random_array(),
            };
            assert_eq!(resp.to_bytes().len(), 92);
            assert_eq!(HandshakeResponse::from_bytes(&resp.to_bytes()).unwrap(), resp);

            let cookie = CookieReply {
                receiver_index: rng.gen(),
                nonce: random_array(),
                encrypted_cookie: random_array(),
            };
            assert_eq!(CookieReply::from_bytes(&cookie.to_bytes()).unwrap(), cookie);

            let data = TransportData {
                receiver_index: rng.gen(),
                counter: rng.gen(),
                encrypted_packet: random_array::<48>().to_vec(),
            };
            assert_eq!(Message::parse(&data.to_bytes()).unwrap(), Message::TransportData(data));
        }
    }

    #[test]
    fn test_short_buffers_rejected() {
        let init = [1u8; HandshakeInitiation::SIZE - 1];
        assert_eq!(
            HandshakeInitiation::from_bytes(&init),
            Err(ProtocolError::InvalidMessageLength {
                expected: 148,
                got: 147
            })
        );

        let mut transport = vec![0u8; TransportData::MIN_SIZE - 1];
        transport[0] = 4;
        assert!(TransportData::from_bytes(&transport).is_err());

        assert!(get_message_type(&[]).is_err());
    }

    #[test]
    fn test_wrong_type_byte_rejected() {
        let mut data = [0u8; HandshakeResponse::SIZE];
        data[0] = 1;
        assert_eq!(
            HandshakeResponse::from_bytes(&data),
            Err(ProtocolError::InvalidMessageType { msg_type: 1 })
        );
        assert!(Message::parse(&[99u8; 100]).is_err());
    }

    #[test]
    fn test_message_dispatch() {
        let mut data = [0u8; CookieReply::SIZE];
        data[0] = 3;
        data[4..8].copy_from_slice(&7u32.to_le_bytes());

        match Message::parse(&data).unwrap() {
            Message::CookieReply(reply) => assert_eq!(reply.receiver_index, 7),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
