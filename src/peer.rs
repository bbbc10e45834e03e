//! One authenticated neighbor on one link: the leaf of the controller's
//! state, owning a cryptographic session, liveness bookkeeping, and a
//! switch slot.

use crate::crypto::blake2s;
use crate::protocol::{Session, SessionState};
use crate::switch::PathLabel;
use crate::transport_link::LinkAddr;

/// Controller-visible peer state. The four handshake states and
/// Established mirror the session's own state one-to-one; Unresponsive is
/// controller-only and overrides the session view while liveness is
/// considered lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unauthenticated,
    Handshake1,
    Handshake2,
    Handshake3,
    Established,
    Unresponsive,
}

impl From<SessionState> for PeerState {
    fn from(s: SessionState) -> Self {
        match s {
            SessionState::New => PeerState::Unauthenticated,
            SessionState::Handshake1 => PeerState::Handshake1,
            SessionState::Handshake2 => PeerState::Handshake2,
            SessionState::Handshake3 => PeerState::Handshake3,
            SessionState::Established => PeerState::Established,
        }
    }
}

/// Derive the mesh network-layer address from a peer's public key:
/// `ip6 = prefix(H(H(publicKey)))`.
pub fn derive_ip6(public_key: &[u8; 32]) -> [u8; 16] {
    let first = blake2s::hash(public_key);
    let second = blake2s::hash(&first);
    let mut ip6 = [0u8; 16];
    ip6.copy_from_slice(&second[..16]);
    ip6
}

/// A valid mesh address begins with `0xfc`.
pub fn is_valid_mesh_address(ip6: &[u8; 16]) -> bool {
    ip6[0] == 0xfc
}

pub struct Peer {
    pub lladdr: LinkAddr,
    pub key: Option<[u8; 32]>,
    pub ip6: Option<[u8; 16]>,
    pub path_label: PathLabel,
    pub protocol_version: u32,
    pub time_of_last_message: i64,
    pub time_of_last_ping: i64,
    pub ping_count: u64,
    pub is_incoming: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub session: Box<dyn Session>,
    unresponsive: bool,
    pre_established_frames: u64,
}

impl Peer {
    pub fn new(
        lladdr: LinkAddr,
        session: Box<dyn Session>,
        path_label: PathLabel,
        is_incoming: bool,
        now: i64,
        ping_after: i64,
    ) -> Self {
        let key = session.her_public_key();
        Self {
            lladdr,
            key,
            ip6: key.map(|k| derive_ip6(&k)),
            path_label,
            protocol_version: 0,
            // Seeded so the first ping tick treats the peer as lazy and
            // probes it immediately.
            time_of_last_message: now - ping_after - 1,
            time_of_last_ping: 0,
            ping_count: 0,
            is_incoming,
            bytes_in: 0,
            bytes_out: 0,
            session,
            unresponsive: false,
            pre_established_frames: 0,
        }
    }

    /// Current controller-visible state: the session's state, unless the
    /// controller has declared the peer unresponsive.
    pub fn state(&self) -> PeerState {
        if self.unresponsive {
            PeerState::Unresponsive
        } else {
            self.session.state().into()
        }
    }

    pub fn mark_unresponsive(&mut self) {
        self.unresponsive = true;
    }

    /// Called when a valid frame arrives while the session is (or
    /// becomes) Established: clears any controller-declared Unresponsive
    /// override, recovering the peer without republishing a Peer event.
    pub fn clear_unresponsive(&mut self) {
        self.unresponsive = false;
    }

    pub fn is_established(&self) -> bool {
        !self.unresponsive && self.session.state() == SessionState::Established
    }

    /// Record that a frame decrypted successfully: advances
    /// `time_of_last_message`, refreshes the learned key/ip6, and tallies
    /// inbound bytes.
    pub fn record_received(&mut self, now: i64, payload_len: usize) {
        self.time_of_last_message = now;
        self.bytes_in += payload_len as u64;
        if self.key.is_none() {
            if let Some(k) = self.session.her_public_key() {
                self.key = Some(k);
                self.ip6 = Some(derive_ip6(&k));
            }
        }
    }

    pub fn record_sent(&mut self, payload_len: usize) {
        self.bytes_out += payload_len as u64;
    }

    pub fn is_silent(&self, now: i64, ping_after: i64) -> bool {
        now >= self.time_of_last_message + ping_after
    }

    pub fn ping_is_due(&self, now: i64, ping_after: i64) -> bool {
        now >= self.time_of_last_ping + ping_after
    }

    pub fn is_past_unresponsive(&self, now: i64, unresponsive_after: i64) -> bool {
        now > self.time_of_last_message + unresponsive_after
    }

    pub fn is_past_forget(&self, now: i64, forget_after: i64) -> bool {
        now > self.time_of_last_message + forget_after
    }

    /// Count one pre-Established frame dropped by the admission guard and
    /// report whether this one should trigger an opportunistic switch-ping
    /// (at most once every 7).
    pub fn note_pre_established_frame(&mut self) -> bool {
        let due = self.pre_established_frames % 7 == 0;
        self.pre_established_frames += 1;
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FakeSession;

    fn fake_peer(state: SessionState, now: i64) -> Peer {
        let session = Box::new(FakeSession::new(state).with_peer([5u8; 32]));
        Peer::new(LinkAddr(vec![1, 2, 3]), session, 7, true, now, 3072)
    }

    #[test]
    fn test_new_peer_seeds_lazy_timestamp() {
        let peer = fake_peer(SessionState::New, 10_000);
        assert_eq!(peer.time_of_last_message, 10_000 - 3072 - 1);
        assert!(peer.is_silent(10_000, 3072));
    }

    #[test]
    fn test_state_mirrors_session_until_unresponsive() {
        let mut peer = fake_peer(SessionState::Established, 0);
        assert_eq!(peer.state(), PeerState::Established);
        peer.mark_unresponsive();
        assert_eq!(peer.state(), PeerState::Unresponsive);
        peer.clear_unresponsive();
        assert_eq!(peer.state(), PeerState::Established);
    }

    #[test]
    fn test_derive_ip6_deterministic() {
        let key = [9u8; 32];
        assert_eq!(derive_ip6(&key), derive_ip6(&key));
    }

    #[test]
    fn test_record_received_advances_timestamp_and_bytes() {
        let mut peer = fake_peer(SessionState::Established, 0);
        peer.record_received(500, 10);
        assert_eq!(peer.time_of_last_message, 500);
        assert_eq!(peer.bytes_in, 10);
    }
}
