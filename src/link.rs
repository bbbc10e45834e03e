//! One registered link-layer transport: owns the lladdr→Peer map, the
//! beacon-state flag, and the inbound demux that routes frames to the
//! right peer or to the beacon/unknown-source paths.

use std::collections::HashMap;

use crate::peer::{derive_ip6, is_valid_mesh_address, Peer};
use crate::protocol::messages::Beacon;
use crate::protocol::session::{derive_psk, local_public_key, NoiseSession};
use crate::protocol::Session;
use crate::rng::Rng;
use crate::switch::{PathLabel, Switch};
use crate::transport_link::{InboundFrame, LinkAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconMode {
    Off,
    Accept,
    Send,
}

impl BeaconMode {
    pub fn accepts(self) -> bool {
        matches!(self, BeaconMode::Accept | BeaconMode::Send)
    }
}

/// Outcome of the inbound dispatch order: broadcast → beacon; hit → peer;
/// miss → unknown-source; too short → dropped.
pub enum Demux {
    Beacon,
    PeerHit,
    UnknownSource,
    Runt,
}

pub enum BeaconOutcome {
    Dropped(&'static str),
    PasswordUpdated,
    Created {
        public_key: [u8; 32],
        ip6: [u8; 16],
        path_label: PathLabel,
        outbound_handshake: Option<Vec<u8>>,
    },
}

pub enum UnknownSourceOutcome {
    /// The session rejected the first frame outright; the speculative
    /// Peer was never kept.
    Dropped,
    Admitted {
        public_key: Option<[u8; 32]>,
        outbound_handshake: Option<Vec<u8>>,
    },
}

pub struct LinkInterface {
    pub name: String,
    pub if_num: u32,
    pub beacon_mode: BeaconMode,
    order: Vec<LinkAddr>,
    peers: HashMap<LinkAddr, Peer>,
}

impl LinkInterface {
    pub fn new(name: impl Into<String>, if_num: u32) -> Self {
        Self {
            name: name.into(),
            if_num,
            beacon_mode: BeaconMode::Off,
            order: Vec::new(),
            peers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer(&self, addr: &LinkAddr) -> Option<&Peer> {
        self.peers.get(addr)
    }

    pub fn peer_mut(&mut self, addr: &LinkAddr) -> Option<&mut Peer> {
        self.peers.get_mut(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkAddr, &Peer)> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&LinkAddr, &mut Peer)> {
        self.peers.iter_mut()
    }

    pub fn insert_peer(&mut self, addr: LinkAddr, peer: Peer) {
        if !self.peers.contains_key(&addr) {
            self.order.push(addr.clone());
        }
        self.peers.insert(addr, peer);
    }

    pub fn remove_peer(&mut self, addr: &LinkAddr) -> Option<Peer> {
        let removed = self.peers.remove(addr);
        if removed.is_some() {
            self.order.retain(|a| a != addr);
        }
        removed
    }

    /// Inbound dispatch order from the link's point of view: frames the
    /// transport already tagged as broadcast go to the beacon handler
    /// regardless of content.
    pub fn dispatch(&self, frame: &InboundFrame) -> Demux {
        if frame.payload.is_empty() {
            return Demux::Runt;
        }
        if frame.broadcast {
            return Demux::Beacon;
        }
        if self.peers.contains_key(&frame.from) {
            Demux::PeerHit
        } else {
            Demux::UnknownSource
        }
    }

    /// Scan the peer map starting at a uniformly random offset and return
    /// the first peer that is both silent and due for another ping.
    /// Fairness without a priority queue: a single misbehaving peer at
    /// the head of the map can't monopolize every tick's ping slot.
    pub fn pick_ping_candidate(
        &self,
        rng: &mut dyn Rng,
        now: i64,
        ping_after: i64,
    ) -> Option<LinkAddr> {
        let n = self.order.len();
        if n == 0 {
            return None;
        }
        let start = rng.next_below(n);
        for i in 0..n {
            let idx = (start + i) % n;
            let addr = &self.order[idx];
            if let Some(peer) = self.peers.get(addr) {
                if peer.is_silent(now, ping_after) && peer.ping_is_due(now, ping_after) {
                    return Some(addr.clone());
                }
            }
        }
        None
    }

    /// §4.3 beacon accept path.
    #[allow(clippy::too_many_arguments)]
    pub fn accept_beacon(
        &mut self,
        from: LinkAddr,
        beacon: &Beacon,
        local_private_key: [u8; 32],
        local_public_key: &[u8; 32],
        local_index: u32,
        local_protocol_version: u32,
        switch: &dyn Switch,
        now: i64,
        ping_after: i64,
    ) -> BeaconOutcome {
        if beacon.protocol_version != local_protocol_version {
            return BeaconOutcome::Dropped("incompatible protocol version");
        }
        if &beacon.public_key == local_public_key {
            return BeaconOutcome::Dropped("self-beacon");
        }
        let ip6 = derive_ip6(&beacon.public_key);
        if !is_valid_mesh_address(&ip6) {
            return BeaconOutcome::Dropped("advertised key does not hash to a mesh address");
        }

        let psk = derive_psk(&beacon.password);

        if let Some(peer) = self.peers.get_mut(&from) {
            peer.session.set_auth(Some(psk));
            return BeaconOutcome::PasswordUpdated;
        }

        let path_label = match switch.add_interface(0) {
            Ok(label) => label,
            Err(_) => return BeaconOutcome::Dropped("switch out of space"),
        };

        let mut session: Box<dyn Session> = Box::new(NoiseSession::outbound(
            local_private_key,
            beacon.public_key,
            local_index,
        ));
        session.set_auth(Some(psk));
        let _ = session.begin_handshake();
        let outbound_handshake = session.take_outbound_handshake();

        let mut peer = Peer::new(from.clone(), session, path_label, true, now, ping_after);
        peer.key = Some(beacon.public_key);
        peer.ip6 = Some(ip6);
        self.insert_peer(from, peer);

        BeaconOutcome::Created {
            public_key: beacon.public_key,
            ip6,
            path_label,
            outbound_handshake,
        }
    }

    /// §4.4 unknown-source admission: speculatively create an
    /// inbound-mode session and feed it the first frame. A rejection
    /// destroys the Peer silently — the frame was spurious.
    pub fn admit_unknown_source(
        &mut self,
        from: LinkAddr,
        payload: &[u8],
        local_private_key: [u8; 32],
        local_index: u32,
        switch: &dyn Switch,
        now: i64,
        ping_after: i64,
    ) -> UnknownSourceOutcome {
        let path_label = match switch.add_interface(0) {
            Ok(label) => label,
            Err(_) => return UnknownSourceOutcome::Dropped,
        };

        let mut session = Box::new(NoiseSession::inbound(local_private_key, local_index));
        match session.receive(payload) {
            Ok(_) => {
                let outbound_handshake = session.take_outbound_handshake();
                let public_key = session.her_public_key();
                let mut peer = Peer::new(from.clone(), session, path_label, true, now, ping_after);
                peer.record_received(now, payload.len());
                self.insert_peer(from, peer);
                UnknownSourceOutcome::Admitted {
                    public_key,
                    outbound_handshake,
                }
            }
            Err(_) => {
                switch.remove_interface(path_label);
                UnknownSourceOutcome::Dropped
            }
        }
    }

    /// §4.1 relocation: if another peer on this link shares `addr`'s
    /// public key, transplant `addr`'s path label from the older peer and
    /// destroy the older one. Returns the destroyed peer's public key so
    /// the caller can publish its Peer-Gone event.
    pub fn relocate_if_needed(
        &mut self,
        addr: &LinkAddr,
        switch: &dyn Switch,
    ) -> Option<[u8; 32]> {
        let new_key = self.peers.get(addr)?.key?;
        let new_label = self.peers.get(addr)?.path_label;

        let old_addr = self
            .order
            .iter()
            .find(|a| *a != addr && self.peers.get(*a).and_then(|p| p.key) == Some(new_key))
            .cloned()?;
        let old_label = self.peers.get(&old_addr)?.path_label;

        if switch.swap_interfaces(new_label, old_label).is_err() {
            return None;
        }

        if let Some(p) = self.peers.get_mut(addr) {
            p.path_label = old_label;
        }

        let removed = self.remove_peer(&old_addr)?;
        switch.remove_interface(new_label);
        removed.key
    }
}

/// Construct an outbound session with the local keypair this controller
/// runs under, used by `bootstrapPeer` and, once `local_public_key` is
/// known, by the beacon path.
pub fn make_outbound_session(
    local_private: [u8; 32],
    her_public_key: [u8; 32],
    local_index: u32,
) -> Box<dyn Session> {
    Box::new(NoiseSession::outbound(local_private, her_public_key, local_index))
}

pub fn my_public_key(local_private: &[u8; 32]) -> [u8; 32] {
    local_public_key(local_private)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FakeRng;
    use crate::switch::InMemorySwitch;

    fn addr(n: u8) -> LinkAddr {
        LinkAddr(vec![n])
    }

    #[test]
    fn test_dispatch_order() {
        let link = LinkInterface::new("eth0", 0);
        let broadcast = InboundFrame {
            from: addr(1),
            broadcast: true,
            payload: vec![1, 2, 3],
        };
        assert!(matches!(link.dispatch(&broadcast), Demux::Beacon));

        let runt = InboundFrame {
            from: addr(1),
            broadcast: false,
            payload: vec![],
        };
        assert!(matches!(link.dispatch(&runt), Demux::Runt));

        let unknown = InboundFrame {
            from: addr(1),
            broadcast: false,
            payload: vec![1],
        };
        assert!(matches!(link.dispatch(&unknown), Demux::UnknownSource));
    }

    #[test]
    fn test_beacon_rejects_self_and_incompatible_version() {
        let mut link = LinkInterface::new("eth0", 0);
        let switch = InMemorySwitch::new(4);
        let local_priv = [0u8; 32];
        let local_key = [1u8; 32];

        let self_beacon = Beacon {
            public_key: local_key,
            protocol_version: 1,
            password: [0u8; 16],
        };
        assert!(matches!(
            link.accept_beacon(addr(1), &self_beacon, local_priv, &local_key, 1, 1, &switch, 0, 3072),
            BeaconOutcome::Dropped(_)
        ));

        let bad_version = Beacon {
            public_key: [2u8; 32],
            protocol_version: 99,
            password: [0u8; 16],
        };
        assert!(matches!(
            link.accept_beacon(addr(1), &bad_version, local_priv, &local_key, 1, 1, &switch, 0, 3072),
            BeaconOutcome::Dropped(_)
        ));
        assert_eq!(link.len(), 0);
    }

    #[test]
    fn test_beacon_dedup_updates_password_not_new_peer() {
        let mut link = LinkInterface::new("eth0", 0);
        let switch = InMemorySwitch::new(4);
        let local_priv = [0u8; 32];
        let local_key = [1u8; 32];
        let beacon = Beacon {
            public_key: [3u8; 32],
            protocol_version: 1,
            password: [7u8; 16],
        };

        let first = link.accept_beacon(addr(9), &beacon, local_priv, &local_key, 1, 1, &switch, 0, 3072);
        assert!(matches!(first, BeaconOutcome::Created { .. }));
        assert_eq!(link.len(), 1);

        let second = link.accept_beacon(addr(9), &beacon, local_priv, &local_key, 1, 1, &switch, 1000, 3072);
        assert!(matches!(second, BeaconOutcome::PasswordUpdated));
        assert_eq!(link.len(), 1);
    }

    #[test]
    fn test_pick_ping_candidate_wraps_from_random_offset() {
        let mut link = LinkInterface::new("eth0", 0);
        let switch = InMemorySwitch::new(4);
        for i in 0..3u8 {
            let beacon = Beacon {
                public_key: [i + 10; 32],
                protocol_version: 1,
                password: [0u8; 16],
            };
            link.accept_beacon(addr(i), &beacon, [0u8; 32], &[1u8; 32], 1, 1, &switch, 0, 3072);
        }

        let mut rng = FakeRng::new(vec![2]);
        let candidate = link.pick_ping_candidate(&mut rng, 10_000, 3072);
        assert!(candidate.is_some());
    }

    #[test]
    fn test_no_ping_candidate_when_all_fresh() {
        let mut link = LinkInterface::new("eth0", 0);
        let switch = InMemorySwitch::new(4);
        let beacon = Beacon {
            public_key: [5u8; 32],
            protocol_version: 1,
            password: [0u8; 16],
        };
        link.accept_beacon(addr(1), &beacon, [0u8; 32], &[1u8; 32], 1, 1, &switch, 0, 3072);

        let mut rng = FakeRng::new(vec![0]);
        assert!(link.pick_ping_candidate(&mut rng, 0, 3072).is_none());
    }

    #[test]
    fn test_unknown_source_dropped_on_spurious_frame() {
        let mut link = LinkInterface::new("eth0", 0);
        let switch = InMemorySwitch::new(4);
        let outcome = link.admit_unknown_source(addr(1), b"not a real handshake message", [1u8; 32], 1, &switch, 0, 3072);
        assert!(matches!(outcome, UnknownSourceOutcome::Dropped));
        assert_eq!(link.len(), 0);
        assert_eq!(switch.len(), 0);
    }
}
