//! Wire formats for the peer link controller
//!
//! - Type 1: Handshake Initiation (148 bytes)
//! - Type 2: Handshake Response (92 bytes)
//! - Type 3: Transport Data (variable)
//! - Beacon: fixed-size broadcast advertisement (not type-tagged; carried
//!   on links in its own framing, see `link.rs`)

use crate::error::ProtocolError;

/// Message types carried inside a peer frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HandshakeInitiation = 1,
    HandshakeResponse = 2,
    TransportData = 4,
    SwitchPing = 5,
    SwitchPingResponse = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HandshakeInitiation),
            2 => Ok(Self::HandshakeResponse),
            4 => Ok(Self::TransportData),
            5 => Ok(Self::SwitchPing),
            6 => Ok(Self::SwitchPingResponse),
            _ => Err(ProtocolError::InvalidMessageType { msg_type: value }),
        }
    }
}

/// Handshake Initiation message (148 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | ephemeral_public(32) |
/// encrypted_static(48) | encrypted_timestamp(28) | mac1(16) | mac2(16, unused)
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeInitiation {
    pub sender_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_static: [u8; 48],
    pub encrypted_timestamp: [u8; 28],
    pub mac1: [u8; 16],
}

impl HandshakeInitiation {
    pub const SIZE: usize = 148;

    pub fn new(
        sender_index: u32,
        ephemeral_public: [u8; 32],
        encrypted_static: [u8; 48],
        encrypted_timestamp: [u8; 28],
    ) -> Self {
        Self {
            sender_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
            mac1: [0u8; 16],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::HandshakeInitiation as u8;
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..40].copy_from_slice(&self.ephemeral_public);
        buf[40..88].copy_from_slice(&self.encrypted_static);
        buf[88..116].copy_from_slice(&self.encrypted_timestamp);
        buf[116..132].copy_from_slice(&self.mac1);
        // buf[132..148] reserved for a MAC2-style cookie extension, left zero

        buf
    }

    /// Bytes covered by MAC1 (everything before the MAC1 field itself)
    pub fn bytes_for_mac1(&self) -> [u8; 116] {
        let full = self.to_bytes();
        let mut result = [0u8; 116];
        result.copy_from_slice(&full[..116]);
        result
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        if data[0] != MessageType::HandshakeInitiation as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }

        let sender_index = u32::from_le_bytes(data[4..8].try_into().unwrap());

        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&data[8..40]);

        let mut encrypted_static = [0u8; 48];
        encrypted_static.copy_from_slice(&data[40..88]);

        let mut encrypted_timestamp = [0u8; 28];
        encrypted_timestamp.copy_from_slice(&data[88..116]);

        let mut mac1 = [0u8; 16];
        mac1.copy_from_slice(&data[116..132]);

        Ok(Self {
            sender_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
            mac1,
        })
    }
}

/// Handshake Response message (92 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | receiver_index(4) |
/// ephemeral_public(32) | encrypted_nothing(16) | mac1(16) | mac2(16, unused)
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub sender_index: u32,
    pub receiver_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_nothing: [u8; 16],
    pub mac1: [u8; 16],
}

impl HandshakeResponse {
    pub const SIZE: usize = 92;

    pub fn new(
        sender_index: u32,
        receiver_index: u32,
        ephemeral_public: [u8; 32],
        encrypted_nothing: [u8; 16],
    ) -> Self {
        Self {
            sender_index,
            receiver_index,
            ephemeral_public,
            encrypted_nothing,
            mac1: [0u8; 16],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MessageType::HandshakeResponse as u8;
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..12].copy_from_slice(&self.receiver_index.to_le_bytes());
        buf[12..44].copy_from_slice(&self.ephemeral_public);
        buf[44..60].copy_from_slice(&self.encrypted_nothing);
        buf[60..76].copy_from_slice(&self.mac1);
        buf
    }

    pub fn bytes_for_mac1_owned(&self) -> [u8; 60] {
        let full = self.to_bytes();
        let mut result = [0u8; 60];
        result.copy_from_slice(&full[..60]);
        result
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        if data[0] != MessageType::HandshakeResponse as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }

        let sender_index = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let receiver_index = u32::from_le_bytes(data[8..12].try_into().unwrap());

        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&data[12..44]);

        let mut encrypted_nothing = [0u8; 16];
        encrypted_nothing.copy_from_slice(&data[44..60]);

        let mut mac1 = [0u8; 16];
        mac1.copy_from_slice(&data[60..76]);

        Ok(Self {
            sender_index,
            receiver_index,
            ephemeral_public,
            encrypted_nothing,
            mac1,
        })
    }

    pub fn bytes_for_mac1(data: &[u8]) -> &[u8] {
        &data[..60]
    }
}

/// Transport Data message header (16 bytes, followed by encrypted payload)
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | counter(8) | encrypted_packet(n+16)
/// ```
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub receiver_index: u32,
    pub counter: u64,
}

impl TransportHeader {
    pub const SIZE: usize = 16;
    pub const MIN_SIZE: usize = Self::SIZE + 16;

    pub fn build_message(receiver_index: u32, counter: u64, encrypted_payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + encrypted_payload.len());

        buf.push(MessageType::TransportData as u8);
        buf.extend_from_slice(&[0, 0, 0]);
        buf.extend_from_slice(&receiver_index.to_le_bytes());
        buf.extend_from_slice(&counter.to_le_bytes());
        buf.extend_from_slice(encrypted_payload);

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        if data[0] != MessageType::TransportData as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }

        let receiver_index = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let counter = u64::from_le_bytes(data[8..16].try_into().unwrap());

        Ok(Self {
            receiver_index,
            counter,
        })
    }

    pub fn payload(data: &[u8]) -> &[u8] {
        &data[Self::SIZE..]
    }
}

/// Length of the beacon's password field
pub const BEACON_PASSWORD_LEN: usize = 16;

/// Beacon advertisement broadcast on Send-mode links
///
/// ```text
/// public_key(32) | protocol_version(4, big-endian) | password(16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub public_key: [u8; 32],
    pub protocol_version: u32,
    pub password: [u8; BEACON_PASSWORD_LEN],
}

impl Beacon {
    pub const SIZE: usize = 32 + 4 + BEACON_PASSWORD_LEN;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..32].copy_from_slice(&self.public_key);
        buf[32..36].copy_from_slice(&self.protocol_version.to_be_bytes());
        buf[36..Self::SIZE].copy_from_slice(&self.password);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::MalformedBeacon {
                reason: format!("expected at least {} bytes, got {}", Self::SIZE, data.len()),
            });
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[0..32]);

        let protocol_version = u32::from_be_bytes(data[32..36].try_into().unwrap());

        let mut password = [0u8; BEACON_PASSWORD_LEN];
        password.copy_from_slice(&data[36..Self::SIZE]);

        Ok(Self {
            public_key,
            protocol_version,
            password,
        })
    }
}

/// Switch-ping: a bare liveness probe sent to an already-known peer lladdr,
/// asking it to report its protocol version and path label back.
///
/// ```text
/// type(1) | reserved(3)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SwitchPing;

impl SwitchPing {
    pub const SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MessageType::SwitchPing as u8;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        if data[0] != MessageType::SwitchPing as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }
        Ok(Self)
    }
}

/// Switch-ping response: the responder's protocol version and the path
/// label it has assigned this peer, learned by the requester in one
/// round trip.
///
/// ```text
/// type(1) | reserved(3) | protocol_version(4, big-endian) | path_label(8, big-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPingResponse {
    pub protocol_version: u32,
    pub path_label: u64,
}

impl SwitchPingResponse {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MessageType::SwitchPingResponse as u8;
        buf[4..8].copy_from_slice(&self.protocol_version.to_be_bytes());
        buf[8..16].copy_from_slice(&self.path_label.to_be_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        if data[0] != MessageType::SwitchPingResponse as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }
        let protocol_version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let path_label = u64::from_be_bytes(data[8..16].try_into().unwrap());
        Ok(Self {
            protocol_version,
            path_label,
        })
    }
}

/// Get the message type from a packet
pub fn get_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidMessageLength {
            expected: 1,
            got: 0,
        });
    }
    MessageType::try_from(data[0])
}
