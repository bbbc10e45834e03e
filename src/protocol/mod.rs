//! Peer link protocol: wire formats, handshake, and the `Session` contract
//!
//! - Message wire formats (`messages`)
//! - Handshake logic (Noise IKpsk2) (`handshake`)
//! - Transport encryption (`transport`)
//! - `Session` contract and the shipped Noise engine (`session`)

pub mod handshake;
pub mod messages;
pub mod session;
pub mod transport;

pub use handshake::{
    verify_initiation_mac1, verify_response_mac1, HandshakeResult, InitiatorHandshake,
    ResponderHandshake,
};
pub use messages::{
    get_message_type, Beacon, HandshakeInitiation, HandshakeResponse, MessageType, SwitchPing,
    SwitchPingResponse, TransportHeader,
};
pub use session::{NoiseSession, ReplayProtectorStats, Session, SessionState};
pub use transport::{ReplayWindow, TransportState};

#[cfg(any(test, feature = "test-util"))]
pub use session::FakeSession;
