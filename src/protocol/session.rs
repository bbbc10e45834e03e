//! The `Session` contract and the shipped Noise-based implementation.
//!
//! The peer/link/controller state machine never reaches into handshake or
//! AEAD internals; it only ever calls through `Session`. `NoiseSession` is
//! the real engine used end to end; `FakeSession` (test-only) lets
//! controller-logic tests force a specific state without driving a full
//! handshake.

use crate::crypto::x25519;
use crate::error::{MeshError, ProtocolError};
use crate::protocol::handshake::{InitiatorHandshake, ResponderHandshake};
use crate::protocol::messages::{HandshakeInitiation, HandshakeResponse};
use crate::protocol::transport::TransportState;

/// Controller-visible handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Handshake1,
    Handshake2,
    Handshake3,
    Established,
}

/// Replay-window counters surfaced for `getPeerStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayProtectorStats {
    pub duplicates: u64,
    pub lost_packets: u64,
    pub received_out_of_range: u64,
}

/// A per-peer authenticated, encrypted channel.
///
/// `wrap` in the distilled contract corresponds to the constructors on
/// `NoiseSession` (`outbound`/`inbound`) rather than a trait method, since
/// construction needs engine-specific key material that a trait object
/// can't express generically.
pub trait Session: Send {
    /// Install or change the pre-shared beacon password.
    fn set_auth(&mut self, password: Option<[u8; 32]>);

    fn state(&self) -> SessionState;

    /// Known once the handshake has identified the remote, or immediately
    /// for outbound sessions where the key was supplied up front.
    fn her_public_key(&self) -> Option<[u8; 32]>;

    fn user(&self) -> Option<&str>;

    fn replay_protector(&self) -> ReplayProtectorStats;

    /// Encrypt a switch packet into a wire frame ready for `externalOut`.
    fn send(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, MeshError>;

    /// Decrypt a wire frame received on `externalIn` into a switch packet.
    /// Also drives the handshake: feed it handshake messages as they
    /// arrive and it returns `Ok(vec![])` with no switch-bound payload.
    fn receive(&mut self, frame: &[u8]) -> Result<Vec<u8>, MeshError>;

    /// Non-empty once the handshake has a message ready to hand to
    /// `externalOut` (an initiation or response the caller must send).
    fn take_outbound_handshake(&mut self) -> Option<Vec<u8>>;

    /// For outbound-role sessions, send the first handshake message.
    /// A no-op for sessions that never initiate.
    fn begin_handshake(&mut self) -> Result<(), MeshError>;
}

enum Role {
    Initiator(InitiatorHandshake),
    Responder(ResponderHandshake),
}

/// Noise IKpsk2 session: the one concrete `Session` this repository ships.
pub struct NoiseSession {
    local_private: [u8; 32],
    local_index: u32,
    her_public_key: Option<[u8; 32]>,
    psk: Option<[u8; 32]>,
    user: Option<String>,
    state: SessionState,
    role: Option<Role>,
    transport: Option<TransportState>,
    pending_outbound: Option<Vec<u8>>,
    remote_index: u32,
}

impl NoiseSession {
    /// Start a session we initiate, to a known peer public key.
    pub fn outbound(local_private: [u8; 32], her_public_key: [u8; 32], local_index: u32) -> Self {
        Self {
            local_private,
            local_index,
            her_public_key: Some(her_public_key),
            psk: None,
            user: None,
            state: SessionState::New,
            role: None,
            transport: None,
            pending_outbound: None,
            remote_index: 0,
        }
    }

    /// Start a session that waits for an unsolicited initiation.
    pub fn inbound(local_private: [u8; 32], local_index: u32) -> Self {
        Self {
            local_private,
            local_index,
            her_public_key: None,
            psk: None,
            user: None,
            state: SessionState::New,
            role: None,
            transport: None,
            pending_outbound: None,
            remote_index: 0,
        }
    }

    /// Begin the handshake on the initiator side: builds and queues
    /// message 1. Moves to `Handshake1`.
    pub fn begin_handshake(&mut self) -> Result<(), MeshError> {
        let her_key = self
            .her_public_key
            .ok_or(ProtocolError::HandshakeFailed {
                reason: "outbound session missing peer public key".into(),
            })?;

        let mut handshake = InitiatorHandshake::new(self.local_private, her_key, self.psk, self.local_index);
        let initiation = handshake.create_initiation()?;
        self.pending_outbound = Some(initiation.to_bytes().to_vec());
        self.role = Some(Role::Initiator(handshake));
        self.state = SessionState::Handshake1;
        Ok(())
    }

    fn handle_initiation(&mut self, data: &[u8]) -> Result<Vec<u8>, MeshError> {
        let initiation = HandshakeInitiation::from_bytes(data)?;

        let mut handshake = ResponderHandshake::new(self.local_private, self.local_index);
        let peer_key = handshake.process_initiation(&initiation)?;
        self.her_public_key = Some(peer_key);
        self.state = SessionState::Handshake1;

        let (response, result) = handshake.create_response(self.psk)?;
        self.remote_index = result.remote_index;
        self.transport = Some(TransportState::new(result.sending_key, result.receiving_key));
        self.role = Some(Role::Responder(handshake));
        // Keys are derived but unconfirmed: held at Handshake3 until the
        // first transport packet decrypts successfully.
        self.state = SessionState::Handshake3;

        Ok(response.to_bytes().to_vec())
    }

    fn handle_response(&mut self, data: &[u8]) -> Result<(), MeshError> {
        let response = HandshakeResponse::from_bytes(data)?;

        let handshake = match &mut self.role {
            Some(Role::Initiator(h)) => h,
            _ => {
                return Err(ProtocolError::HandshakeFailed {
                    reason: "response received outside initiator role".into(),
                }
                .into())
            }
        };

        self.state = SessionState::Handshake2;
        let result = handshake.process_response(&response)?;
        self.remote_index = result.remote_index;
        self.transport = Some(TransportState::new(result.sending_key, result.receiving_key));
        // Decrypting the response's auth tag is already proof the
        // responder derived the same keys, so the initiator skips
        // Handshake3 entirely.
        self.state = SessionState::Established;
        Ok(())
    }
}

impl Session for NoiseSession {
    fn set_auth(&mut self, password: Option<[u8; 32]>) {
        self.psk = password;
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn her_public_key(&self) -> Option<[u8; 32]> {
        self.her_public_key
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn replay_protector(&self) -> ReplayProtectorStats {
        match &self.transport {
            Some(t) => ReplayProtectorStats {
                duplicates: t.replay_window.duplicates(),
                lost_packets: 0,
                received_out_of_range: t.replay_window.received_out_of_range(),
            },
            None => ReplayProtectorStats::default(),
        }
    }

    fn send(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, MeshError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::NoSession)?;
        transport.encrypt(self.remote_index, plaintext)
    }

    fn receive(&mut self, frame: &[u8]) -> Result<Vec<u8>, MeshError> {
        if frame.is_empty() {
            return Err(ProtocolError::InvalidMessageLength {
                expected: 1,
                got: 0,
            }
            .into());
        }

        match frame[0] {
            1 => {
                let response_bytes = self.handle_initiation(frame)?;
                self.pending_outbound = Some(response_bytes);
                Ok(Vec::new())
            }
            2 => {
                self.handle_response(frame)?;
                Ok(Vec::new())
            }
            4 => {
                let transport = self.transport.as_mut().ok_or(ProtocolError::NoSession)?;
                let plaintext = transport.decrypt(frame)?;
                if self.state == SessionState::Handshake3 {
                    self.state = SessionState::Established;
                }
                Ok(plaintext)
            }
            other => Err(ProtocolError::InvalidMessageType { msg_type: other }.into()),
        }
    }

    fn take_outbound_handshake(&mut self) -> Option<Vec<u8>> {
        self.pending_outbound.take()
    }

    fn begin_handshake(&mut self) -> Result<(), MeshError> {
        NoiseSession::begin_handshake(self)
    }
}

/// Derive a local public key from a configured private key, mirroring the
/// key pair every `NoiseSession` constructor expects.
pub fn local_public_key(local_private: &[u8; 32]) -> [u8; 32] {
    x25519::public_key(local_private)
}

/// Stretch a raw beacon/bootstrap password into a 32-byte pre-shared key
/// suitable for `Session::set_auth`.
pub fn derive_psk(password: &[u8]) -> [u8; 32] {
    crate::crypto::blake2s::hash(password)
}

/// Scriptable `Session` double for controller-logic tests that need to
/// force a specific state without driving a full handshake.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeSession {
    pub state: SessionState,
    pub her_public_key: Option<[u8; 32]>,
    pub user: Option<String>,
    pub replay_stats: ReplayProtectorStats,
    pub sent: Vec<Vec<u8>>,
    pub fail_next_receive: bool,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeSession {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            her_public_key: None,
            user: None,
            replay_stats: ReplayProtectorStats::default(),
            sent: Vec::new(),
            fail_next_receive: false,
        }
    }

    pub fn with_peer(mut self, key: [u8; 32]) -> Self {
        self.her_public_key = Some(key);
        self
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Session for FakeSession {
    fn set_auth(&mut self, _password: Option<[u8; 32]>) {}

    fn state(&self) -> SessionState {
        self.state
    }

    fn her_public_key(&self) -> Option<[u8; 32]> {
        self.her_public_key
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn replay_protector(&self) -> ReplayProtectorStats {
        self.replay_stats
    }

    fn send(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, MeshError> {
        self.sent.push(plaintext.to_vec());
        Ok(plaintext.to_vec())
    }

    fn receive(&mut self, frame: &[u8]) -> Result<Vec<u8>, MeshError> {
        if self.fail_next_receive {
            self.fail_next_receive = false;
            return Err(ProtocolError::NoSession.into());
        }
        Ok(frame.to_vec())
    }

    fn take_outbound_handshake(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn begin_handshake(&mut self) -> Result<(), MeshError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519;

    #[test]
    fn test_outbound_inbound_handshake_to_established() {
        let (initiator_priv, initiator_pub) = x25519::generate_keypair();
        let (responder_priv, responder_pub) = x25519::generate_keypair();

        let mut initiator = NoiseSession::outbound(initiator_priv, responder_pub, 1001);
        initiator.begin_handshake().unwrap();
        assert_eq!(initiator.state(), SessionState::Handshake1);

        let initiation = initiator.take_outbound_handshake().unwrap();

        let mut responder = NoiseSession::inbound(responder_priv, 2002);
        let consumed = responder.receive(&initiation).unwrap();
        assert!(consumed.is_empty());
        assert_eq!(responder.state(), SessionState::Handshake3);
        assert_eq!(responder.her_public_key(), Some(initiator_pub));

        let response = responder.take_outbound_handshake().unwrap();
        let consumed = initiator.receive(&response).unwrap();
        assert!(consumed.is_empty());
        assert_eq!(initiator.state(), SessionState::Established);

        let wire = initiator.send(b"hello").unwrap();
        let plaintext = responder.receive(&wire).unwrap();
        assert_eq!(plaintext, b"hello");
        assert_eq!(responder.state(), SessionState::Established);
    }

    #[test]
    fn test_fake_session_forced_state() {
        let mut fake = FakeSession::new(SessionState::Established).with_peer([9u8; 32]);
        assert_eq!(fake.state(), SessionState::Established);
        assert_eq!(fake.her_public_key(), Some([9u8; 32]));
        let wire = fake.send(b"x").unwrap();
        assert_eq!(fake.receive(&wire).unwrap(), b"x");
    }

    #[test]
    fn test_fake_session_injected_failure() {
        let mut fake = FakeSession::new(SessionState::Handshake2);
        fake.fail_next_receive = true;
        assert!(fake.receive(b"anything").is_err());
    }
}
