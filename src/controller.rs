//! The controller root: owns every `LinkInterface`, the periodic ping and
//! beacon ticks, the local beacon payload, and the event-bus endpoint.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AdminError, MeshError};
use crate::eventbus::{EventBus, EventKind, PeerEvent, METRIC_DIRECT, PATHFINDER_BROADCAST};
use crate::link::{self, BeaconMode, BeaconOutcome, Demux, LinkInterface, UnknownSourceOutcome};
use crate::peer::{derive_ip6, is_valid_mesh_address, Peer, PeerState};
use crate::protocol::messages::{get_message_type, Beacon, MessageType, SwitchPing, SwitchPingResponse};
use crate::protocol::session::derive_psk;
use crate::rng::Rng;
use crate::switch::{terminates_here, PathLabel, Switch};
use crate::transport_link::{InboundFrame, LinkAddr, LinkTransport};

/// Snapshot of one peer's liveness and traffic counters, for `getPeerStats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeerStats {
    pub if_num: u32,
    #[serde(with = "hex_bytes32")]
    pub public_key: [u8; 32],
    pub ip6: Option<[u8; 16]>,
    pub path_label: PathLabel,
    pub state: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub ping_count: u64,
    pub protocol_version: u32,
    pub time_of_last_ping: i64,
    pub is_incoming: bool,
    pub replay_duplicates: u64,
    pub replay_lost: u64,
    pub replay_out_of_range: u64,
}

mod hex_bytes32 {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }
}

/// All tuning constants, in milliseconds, with the defaults below.
#[derive(Debug, Clone, Copy)]
pub struct TuningConstants {
    pub unresponsive_after: i64,
    pub ping_after: i64,
    pub ping_interval: i64,
    pub timeout: i64,
    pub forget_after: i64,
    pub beacon_interval: i64,
}

impl Default for TuningConstants {
    fn default() -> Self {
        Self {
            unresponsive_after: 20_480,
            ping_after: 3_072,
            ping_interval: 1_024,
            timeout: 2_048,
            forget_after: 262_144,
            beacon_interval: 32_768,
        }
    }
}

struct Interface {
    link: LinkInterface,
    transport: Arc<dyn LinkTransport>,
}

pub struct Controller {
    interfaces: Vec<Interface>,
    switch: Arc<dyn Switch>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    rng: Box<dyn Rng>,
    local_private_key: [u8; 32],
    local_public_key: [u8; 32],
    beacon_password: [u8; 16],
    protocol_version: u32,
    tuning: TuningConstants,
    next_index: u32,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        switch: Arc<dyn Switch>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn Rng>,
        local_private_key: [u8; 32],
        beacon_password: [u8; 16],
        protocol_version: u32,
        tuning: TuningConstants,
    ) -> Self {
        let local_public_key = crate::protocol::session::local_public_key(&local_private_key);
        Self {
            interfaces: Vec::new(),
            switch,
            event_bus,
            clock,
            rng,
            local_private_key,
            local_public_key,
            beacon_password,
            protocol_version,
            tuning,
            next_index: 1,
        }
    }

    pub fn local_public_key(&self) -> [u8; 32] {
        self.local_public_key
    }

    pub fn local_beacon(&self) -> Beacon {
        Beacon {
            public_key: self.local_public_key,
            protocol_version: self.protocol_version,
            password: self.beacon_password,
        }
    }

    /// `newIface`: register a new link-layer transport and return its
    /// dense `ifNum`.
    pub fn new_interface(&mut self, name: &str, transport: Arc<dyn LinkTransport>) -> u32 {
        let if_num = self.interfaces.len() as u32;
        self.interfaces.push(Interface {
            link: LinkInterface::new(name, if_num),
            transport,
        });
        if_num
    }

    fn interface_mut(&mut self, if_num: u32) -> Result<&mut Interface, AdminError> {
        self.interfaces
            .get_mut(if_num as usize)
            .ok_or(AdminError::NoSuchIface { ifnum: if_num })
    }

    fn next_sender_index(&mut self) -> u32 {
        let idx = self.next_index;
        self.next_index = self.next_index.wrapping_add(1).max(1);
        idx
    }

    /// `beaconState`: set a link's beacon mode. Transitioning into `Send`
    /// also emits one beacon immediately.
    pub async fn set_beacon_state(&mut self, if_num: u32, mode: BeaconMode) -> Result<(), AdminError> {
        let local_beacon = self.local_beacon();
        let iface = self.interface_mut(if_num)?;
        let was_send = iface.link.beacon_mode == BeaconMode::Send;
        iface.link.beacon_mode = mode;

        if mode == BeaconMode::Send && !was_send {
            if let Err(e) = iface.transport.broadcast(&local_beacon.to_bytes()).await {
                warn!(?e, if_num, "failed to send initial beacon on mode transition");
            }
        }
        Ok(())
    }

    /// `bootstrapPeer`: create an outbound peer to a known public key.
    pub async fn bootstrap_peer(
        &mut self,
        if_num: u32,
        her_public_key: [u8; 32],
        lladdr: LinkAddr,
        password: &[u8],
    ) -> Result<(), AdminError> {
        if her_public_key == self.local_public_key {
            return Err(AdminError::BadKey);
        }
        let ip6 = derive_ip6(&her_public_key);
        if !is_valid_mesh_address(&ip6) {
            return Err(AdminError::BadKey);
        }

        let local_index = self.next_sender_index();
        let local_private = self.local_private_key;
        let now = self.clock.now_ms();
        let ping_after = self.tuning.ping_after;
        let switch = Arc::clone(&self.switch);

        let iface = self.interface_mut(if_num)?;
        let path_label = switch.add_interface(0)?;

        let mut session = link::make_outbound_session(local_private, her_public_key, local_index);
        session.set_auth(Some(derive_psk(password)));
        let _ = session.begin_handshake();
        let outbound = session.take_outbound_handshake();

        let mut peer = Peer::new(lladdr.clone(), session, path_label, false, now, ping_after);
        peer.key = Some(her_public_key);
        peer.ip6 = Some(ip6);
        iface.link.insert_peer(lladdr.clone(), peer);

        if let Some(bytes) = outbound {
            if let Err(e) = iface.transport.send_to(&lladdr, &bytes).await {
                warn!(?e, if_num, "failed to send handshake initiation");
            }
        }

        // Immediately probe once to learn the peer's version and path
        // instead of waiting for the next ping tick.
        self.send_ping(if_num, &lladdr).await;

        Ok(())
    }

    /// `disconnectPeer`: find and destroy the peer with this public key
    /// anywhere in the interface table.
    pub fn disconnect_peer(&mut self, key: [u8; 32]) -> Result<(), AdminError> {
        let found = self.interfaces.iter().enumerate().find_map(|(i, iface)| {
            iface
                .link
                .iter()
                .find(|(_, p)| p.key == Some(key))
                .map(|(a, _)| (i as u32, a.clone()))
        });

        match found {
            Some((if_num, addr)) => {
                self.destroy_peer(if_num, &addr);
                Ok(())
            }
            None => Err(AdminError::NotFound),
        }
    }

    fn destroy_peer(&mut self, if_num: u32, addr: &LinkAddr) {
        let if_num = if_num as usize;
        if let Some(iface) = self.interfaces.get_mut(if_num) {
            if let Some(peer) = iface.link.remove_peer(addr) {
                self.switch.remove_interface(peer.path_label);
                self.publish_peer_gone(&peer);
            }
        }
    }

    fn publish_peer_gone(&self, peer: &Peer) {
        if let Some(key) = peer.key {
            self.publish_peer_gone_fields(key, peer.ip6.unwrap_or([0u8; 16]), peer.path_label, peer.protocol_version);
        }
    }

    fn publish_peer_established(&self, peer: &Peer) {
        if let Some(key) = peer.key {
            self.publish_peer_established_fields(
                key,
                peer.ip6.unwrap_or([0u8; 16]),
                peer.path_label,
                peer.protocol_version,
            );
        }
    }

    /// Same as `publish_peer_gone` but from already-extracted fields, for
    /// call sites that can't hold a `&Peer` alongside a `&self` call.
    fn publish_peer_gone_fields(&self, key: [u8; 32], ip6: [u8; 16], path_label: crate::switch::PathLabel, version: u32) {
        self.event_bus.publish(PeerEvent {
            kind: EventKind::PeerGone,
            pathfinder_id: PATHFINDER_BROADCAST,
            ip6,
            public_key: key,
            path: path_label,
            metric: METRIC_DIRECT,
            version,
        });
    }

    fn publish_peer_established_fields(&self, key: [u8; 32], ip6: [u8; 16], path_label: crate::switch::PathLabel, version: u32) {
        self.event_bus.publish(PeerEvent {
            kind: EventKind::Peer,
            pathfinder_id: PATHFINDER_BROADCAST,
            ip6,
            public_key: key,
            path: path_label,
            metric: METRIC_DIRECT,
            version,
        });
    }

    /// `getPeerStats`: locate a peer by public key anywhere in the
    /// interface table and snapshot its liveness/traffic counters.
    pub fn peer_stats(&self, key: [u8; 32]) -> Option<PeerStats> {
        self.interfaces.iter().enumerate().find_map(|(i, iface)| {
            iface.link.iter().find(|(_, p)| p.key == Some(key)).map(|(_, peer)| {
                let replay = peer.session.replay_protector();
                PeerStats {
                    if_num: i as u32,
                    public_key: key,
                    ip6: peer.ip6,
                    path_label: peer.path_label,
                    state: format!("{:?}", peer.state()),
                    bytes_in: peer.bytes_in,
                    bytes_out: peer.bytes_out,
                    ping_count: peer.ping_count,
                    protocol_version: peer.protocol_version,
                    time_of_last_ping: peer.time_of_last_ping,
                    is_incoming: peer.is_incoming,
                    replay_duplicates: replay.duplicates,
                    replay_lost: replay.lost_packets,
                    replay_out_of_range: replay.received_out_of_range,
                }
            })
        })
    }

    /// Answers a pathfinder's "enumerate peers" query by replaying one
    /// Peer event per Established peer.
    pub fn enumerate_for_pathfinder(&self, pathfinder_id: u32) {
        for iface in &self.interfaces {
            for (_, peer) in iface.link.iter() {
                if peer.is_established() {
                    if let Some(key) = peer.key {
                        self.event_bus.publish(PeerEvent {
                            kind: EventKind::Peer,
                            pathfinder_id,
                            ip6: peer.ip6.unwrap_or([0u8; 16]),
                            public_key: key,
                            path: peer.path_label,
                            metric: METRIC_DIRECT,
                            version: peer.protocol_version,
                        });
                    }
                }
            }
        }
    }

    /// Handle one inbound frame delivered by `if_num`'s transport.
    pub async fn handle_inbound(&mut self, if_num: u32, frame: InboundFrame) -> Result<(), MeshError> {
        let now = self.clock.now_ms();
        let local_private = self.local_private_key;
        let local_public = self.local_public_key;
        let protocol_version = self.protocol_version;
        let ping_after = self.tuning.ping_after;
        let local_index = self.next_sender_index();
        let switch = Arc::clone(&self.switch);

        let demux = {
            let iface = self
                .interfaces
                .get(if_num as usize)
                .ok_or(MeshError::Admin(AdminError::NoSuchIface { ifnum: if_num }))?;
            iface.link.dispatch(&frame)
        };

        match demux {
            Demux::Runt => {
                debug!(if_num, len = frame.payload.len(), "dropped runt frame");
                Ok(())
            }
            Demux::Beacon => {
                let beacon = match Beacon::from_bytes(&frame.payload) {
                    Ok(b) => b,
                    Err(e) => {
                        debug!(if_num, ?e, "dropped malformed beacon");
                        return Ok(());
                    }
                };
                if !self.interfaces[if_num as usize].link.beacon_mode.accepts() {
                    return Ok(());
                }
                let outcome = self.interfaces[if_num as usize].link.accept_beacon(
                    frame.from.clone(),
                    &beacon,
                    local_private,
                    &local_public,
                    local_index,
                    protocol_version,
                    switch.as_ref(),
                    now,
                    ping_after,
                );
                match outcome {
                    BeaconOutcome::Dropped(reason) => {
                        debug!(if_num, reason, "dropped beacon");
                    }
                    BeaconOutcome::PasswordUpdated => {
                        debug!(if_num, "beacon rotated peer password");
                    }
                    BeaconOutcome::Created {
                        public_key,
                        path_label,
                        outbound_handshake,
                        ..
                    } => {
                        info!(if_num, path_label, "admitted peer via beacon");
                        if let Some(bytes) = outbound_handshake {
                            let iface = &self.interfaces[if_num as usize];
                            let _ = iface.transport.send_to(&frame.from, &bytes).await;
                        }
                        let _ = public_key;
                    }
                }
                Ok(())
            }
            Demux::UnknownSource => {
                let outcome = self.interfaces[if_num as usize].link.admit_unknown_source(
                    frame.from.clone(),
                    &frame.payload,
                    local_private,
                    local_index,
                    switch.as_ref(),
                    now,
                    ping_after,
                );
                match outcome {
                    UnknownSourceOutcome::Dropped => {
                        debug!(if_num, "unknown-source frame rejected by session");
                    }
                    UnknownSourceOutcome::Admitted {
                        outbound_handshake, ..
                    } => {
                        info!(if_num, "admitted unknown-source peer");
                        if let Some(bytes) = outbound_handshake {
                            let iface = &self.interfaces[if_num as usize];
                            let _ = iface.transport.send_to(&frame.from, &bytes).await;
                        }
                    }
                }
                Ok(())
            }
            Demux::PeerHit => self.handle_peer_frame(if_num, frame, now).await,
        }
    }

    async fn handle_peer_frame(
        &mut self,
        if_num: u32,
        frame: InboundFrame,
        now: i64,
    ) -> Result<(), MeshError> {
        match get_message_type(&frame.payload) {
            Ok(MessageType::SwitchPing) => {
                let path_label = self.interfaces[if_num as usize]
                    .link
                    .peer(&frame.from)
                    .map(|p| p.path_label);
                if let Some(path_label) = path_label {
                    let response = SwitchPingResponse {
                        protocol_version: self.protocol_version,
                        path_label,
                    }
                    .to_bytes();
                    let iface = &self.interfaces[if_num as usize];
                    if let Err(e) = iface.transport.send_to(&frame.from, &response).await {
                        debug!(if_num, ?e, "failed to send switch-ping response");
                    }
                }
                return Ok(());
            }
            Ok(MessageType::SwitchPingResponse) => {
                if let Ok(response) = SwitchPingResponse::from_bytes(&frame.payload) {
                    self.record_ping_response(if_num, &frame.from, response.protocol_version, now);
                }
                return Ok(());
            }
            _ => {}
        }

        let iface = &mut self.interfaces[if_num as usize];

        let was_established = iface
            .link
            .peer(&frame.from)
            .map(|p| p.is_established())
            .unwrap_or(false);
        let was_unresponsive = iface
            .link
            .peer(&frame.from)
            .map(|p| matches!(p.state(), PeerState::Unresponsive))
            .unwrap_or(false);

        let peer = match iface.link.peer_mut(&frame.from) {
            Some(p) => p,
            None => return Ok(()),
        };

        match peer.session.receive(&frame.payload) {
            Ok(plaintext) => {
                peer.record_received(now, frame.payload.len());
                if was_unresponsive {
                    peer.clear_unresponsive();
                }

                if let Some(bytes) = peer.session.take_outbound_handshake() {
                    let _ = iface.transport.send_to(&frame.from, &bytes).await;
                }

                let now_established = iface
                    .link
                    .peer(&frame.from)
                    .map(|p| p.is_established())
                    .unwrap_or(false);

                if now_established && !was_established {
                    let evicted = iface.link.relocate_if_needed(&frame.from, self.switch.as_ref());
                    if let Some(evicted_key) = evicted {
                        info!(if_num, "relocated peer, retired older session");
                        self.event_bus.publish(PeerEvent {
                            kind: EventKind::PeerGone,
                            pathfinder_id: PATHFINDER_BROADCAST,
                            ip6: derive_ip6(&evicted_key),
                            public_key: evicted_key,
                            path: 0,
                            metric: METRIC_DIRECT,
                            version: 0,
                        });
                    }
                    if let Some(p) = self.interfaces[if_num as usize].link.peer(&frame.from) {
                        self.publish_peer_established(p);
                    }
                } else if !plaintext.is_empty() {
                    if now_established || terminates_here(&plaintext) {
                        if let Some(p) = self.interfaces[if_num as usize].link.peer(&frame.from) {
                            self.switch.switch_in(p.path_label, plaintext);
                        }
                    } else {
                        debug!(if_num, "dropped pre-Established frame not addressed here");
                        let should_ping = self.interfaces[if_num as usize]
                            .link
                            .peer_mut(&frame.from)
                            .map(|p| p.note_pre_established_frame())
                            .unwrap_or(false);
                        if should_ping {
                            self.send_ping(if_num, &frame.from).await;
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                debug!(if_num, ?e, "peer frame rejected");
                Ok(())
            }
        }
    }

    /// Fired every `pingInterval`: at most one ping per link per tick.
    pub async fn ping_tick(&mut self) {
        let now = self.clock.now_ms();
        let ping_after = self.tuning.ping_after;
        let unresponsive_after = self.tuning.unresponsive_after;
        let forget_after = self.tuning.forget_after;

        for if_num in 0..self.interfaces.len() as u32 {
            let candidate = {
                let iface = &self.interfaces[if_num as usize];
                iface.link.pick_ping_candidate(self.rng.as_mut(), now, ping_after)
            };

            let Some(addr) = candidate else { continue };

            let is_incoming = self.interfaces[if_num as usize]
                .link
                .peer(&addr)
                .map(|p| p.is_incoming)
                .unwrap_or(false);
            let past_forget = self.interfaces[if_num as usize]
                .link
                .peer(&addr)
                .map(|p| p.is_past_forget(now, forget_after))
                .unwrap_or(false);

            if is_incoming && past_forget {
                self.destroy_peer(if_num, &addr);
                continue;
            }

            let past_unresponsive = self.interfaces[if_num as usize]
                .link
                .peer(&addr)
                .map(|p| p.is_past_unresponsive(now, unresponsive_after))
                .unwrap_or(false);

            if past_unresponsive {
                let was_established = self.interfaces[if_num as usize]
                    .link
                    .peer(&addr)
                    .map(|p| p.is_established())
                    .unwrap_or(false);

                let mut gone_event = None;
                let mut should_ping = false;
                if let Some(peer) = self.interfaces[if_num as usize].link.peer_mut(&addr) {
                    let was_already_unresponsive = matches!(peer.state(), PeerState::Unresponsive);
                    peer.mark_unresponsive();
                    if was_established && !was_already_unresponsive {
                        if let Some(key) = peer.key {
                            gone_event =
                                Some((key, peer.ip6.unwrap_or([0u8; 16]), peer.path_label, peer.protocol_version));
                        }
                    }
                    // 1-in-8 admission while the peer is down.
                    should_ping = peer.ping_count % 8 == 0;
                    peer.ping_count += 1;
                }

                if let Some((key, ip6, path_label, version)) = gone_event {
                    self.publish_peer_gone_fields(key, ip6, path_label, version);
                }
                if should_ping {
                    self.send_ping(if_num, &addr).await;
                }
            } else {
                // Lazy but not yet unresponsive: always ping, no throttle.
                if let Some(peer) = self.interfaces[if_num as usize].link.peer_mut(&addr) {
                    peer.ping_count += 1;
                }
                self.send_ping(if_num, &addr).await;
            }
        }
    }

    async fn send_ping(&self, if_num: u32, addr: &LinkAddr) {
        let iface = &self.interfaces[if_num as usize];
        if iface.link.peer(addr).is_none() {
            return;
        }
        let ping = SwitchPing.to_bytes();
        if let Err(e) = iface.transport.send_to(addr, &ping).await {
            debug!(if_num, ?e, "failed to send switch-ping");
        }
    }

    /// Record a ping response: advances `timeOfLastPing` and, for
    /// Established peers, re-publishes the Peer event so routing learns
    /// the refreshed path/version.
    pub fn record_ping_response(
        &mut self,
        if_num: u32,
        addr: &LinkAddr,
        reported_version: u32,
        response_time: i64,
    ) {
        if reported_version != self.protocol_version {
            warn!(if_num, reported_version, "ping response has incompatible version, ignoring");
            return;
        }
        let established_event = {
            let Some(iface) = self.interfaces.get_mut(if_num as usize) else {
                return;
            };
            let Some(peer) = iface.link.peer_mut(addr) else {
                return;
            };
            peer.protocol_version = reported_version;
            peer.time_of_last_ping = response_time;

            if peer.is_established() {
                peer.key
                    .map(|key| (key, peer.ip6.unwrap_or([0u8; 16]), peer.path_label, peer.protocol_version))
            } else {
                None
            }
        };

        if let Some((key, ip6, path_label, version)) = established_event {
            self.publish_peer_established_fields(key, ip6, path_label, version);
        }
    }

    /// Fired every `beaconInterval`: every Send-mode link re-broadcasts
    /// the local beacon.
    pub async fn beacon_tick(&mut self) {
        let beacon = self.local_beacon().to_bytes();
        for iface in &self.interfaces {
            if iface.link.beacon_mode == BeaconMode::Send {
                if let Err(e) = iface.transport.broadcast(&beacon).await {
                    warn!(?e, "failed to send periodic beacon");
                }
            }
        }
    }

    /// Outbound data path (§4.7): the switch handing a packet to a
    /// peer's interface.
    pub async fn switch_out(&mut self, if_num: u32, addr: &LinkAddr, packet: &[u8]) -> Result<(), MeshError> {
        let now = self.clock.now_ms();
        let unresponsive_after = self.tuning.unresponsive_after;

        let iface = self
            .interfaces
            .get_mut(if_num as usize)
            .ok_or_else(|| MeshError::Admin(AdminError::NoSuchIface { ifnum: if_num }))?;
        let Some(peer) = iface.link.peer_mut(addr) else {
            return Ok(());
        };

        peer.record_sent(packet.len());

        // A long-silent peer gets a clone handed to the session so the
        // session may mangle it freely on an error path, and the switch
        // is told up front the packet is undeliverable.
        let synthesize_undeliverable = now - peer.time_of_last_message > unresponsive_after;
        let to_send = packet.to_vec();

        match peer.session.send(&to_send) {
            Ok(wire) => {
                if let Err(e) = iface.transport.send_to(addr, &wire).await {
                    debug!(if_num, ?e, "transport send failed, treated as transient");
                }
            }
            Err(e) => {
                debug!(if_num, ?e, "session encrypt failed on outbound packet");
            }
        }

        if synthesize_undeliverable {
            self.switch.report_undeliverable(peer.path_label);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::eventbus::InMemoryEventBus;
    use crate::rng::FakeRng;
    use crate::switch::InMemorySwitch;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<(LinkAddr, Vec<u8>)>>,
        broadcasts: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LinkTransport for RecordingTransport {
        async fn recv(&self) -> Result<InboundFrame, MeshError> {
            std::future::pending().await
        }

        async fn send_to(&self, to: &LinkAddr, payload: &[u8]) -> Result<(), MeshError> {
            self.sent.lock().unwrap().push((to.clone(), payload.to_vec()));
            Ok(())
        }

        async fn broadcast(&self, payload: &[u8]) -> Result<(), MeshError> {
            self.broadcasts.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn make_controller(clock: Arc<FakeClock>, rng: Vec<usize>) -> (Controller, Arc<InMemorySwitch>, Arc<InMemoryEventBus>) {
        let switch = Arc::new(InMemorySwitch::new(16));
        let bus = Arc::new(InMemoryEventBus::new());
        let controller = Controller::new(
            switch.clone(),
            bus.clone(),
            clock,
            Box::new(FakeRng::new(rng)),
            [7u8; 32],
            [1u8; 16],
            22,
            TuningConstants::default(),
        );
        (controller, switch, bus)
    }

    #[tokio::test]
    async fn test_bootstrap_peer_sends_initiation() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock, vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());

        controller
            .bootstrap_peer(if_num, [9u8; 32], LinkAddr(vec![1, 2, 3]), b"pw")
            .await
            .unwrap();

        // One handshake initiation plus one immediate switch-ping.
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_peer_rejects_local_key() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock, vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport);
        let local_key = controller.local_public_key();

        let result = controller
            .bootstrap_peer(if_num, local_key, LinkAddr(vec![1]), b"pw")
            .await;
        assert!(matches!(result, Err(AdminError::BadKey)));
    }

    #[tokio::test]
    async fn test_set_beacon_state_send_emits_immediately() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock, vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());

        controller.set_beacon_state(if_num, BeaconMode::Send).await.unwrap();
        assert_eq!(transport.broadcasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_peer_not_found() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock, vec![0]);
        assert!(matches!(
            controller.disconnect_peer([1u8; 32]),
            Err(AdminError::NotFound)
        ));
    }

    // --- End-to-end scenarios, driving exact Clock-stamped sequences ---

    use crate::protocol::session::NoiseSession;
    use crate::protocol::Session;

    /// Drive a real outbound handshake to completion against a controller
    /// that initiated it via `bootstrap_peer`, standing in for the remote
    /// peer with a second real `NoiseSession`.
    async fn complete_bootstrap_handshake(
        controller: &mut Controller,
        if_num: u32,
        transport: &RecordingTransport,
        addr: LinkAddr,
        remote_priv: [u8; 32],
        remote_index: u32,
    ) {
        // bootstrap_peer sends the handshake initiation first and an
        // immediate switch-ping right after, both to `addr`: take the
        // first match, not the last.
        let initiation = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .find(|(a, _)| a == &addr)
            .expect("handshake initiation not sent")
            .1
            .clone();

        let mut remote = NoiseSession::inbound(remote_priv, remote_index);
        remote.set_auth(Some(derive_psk(b"pw")));
        let consumed = remote.receive(&initiation).unwrap();
        assert!(consumed.is_empty());
        let response = remote.take_outbound_handshake().unwrap();

        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: false,
                    payload: response,
                },
            )
            .await
            .unwrap();
    }

    /// Drive a real inbound handshake to Established against a controller
    /// admitting an unsolicited peer, standing in for the remote with a
    /// second real `NoiseSession`. Returns the remote's public key.
    async fn establish_remote_peer(
        controller: &mut Controller,
        if_num: u32,
        transport: &RecordingTransport,
        addr: LinkAddr,
        remote_priv: [u8; 32],
        remote_index: u32,
    ) -> [u8; 32] {
        let remote_pub = crate::crypto::x25519::public_key(&remote_priv);
        let controller_pub = controller.local_public_key();

        let mut remote = NoiseSession::outbound(remote_priv, controller_pub, remote_index);
        remote.begin_handshake().unwrap();
        let initiation = remote.take_outbound_handshake().unwrap();

        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr.clone(),
                    broadcast: false,
                    payload: initiation,
                },
            )
            .await
            .unwrap();

        let response = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(a, _)| a == &addr)
            .expect("handshake response not sent")
            .1
            .clone();
        remote.receive(&response).unwrap();

        let data = remote.send(&[]).unwrap();
        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: false,
                    payload: data,
                },
            )
            .await
            .unwrap();

        remote_pub
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<PeerEvent>) -> Vec<PeerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_scenario_bootstrap_ping_round_trip() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, bus) = make_controller(clock.clone(), vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());
        let mut events = bus.subscribe();

        let (remote_priv, remote_pub) = crate::crypto::x25519::generate_keypair();
        let addr = LinkAddr(vec![1, 2, 3]);
        controller
            .bootstrap_peer(if_num, remote_pub, addr.clone(), b"pw")
            .await
            .unwrap();

        complete_bootstrap_handshake(&mut controller, if_num, &transport, addr.clone(), remote_priv, 42).await;
        drain(&mut events);

        let path_label = controller.peer_stats(remote_pub).unwrap().path_label;

        clock.set(1500);
        let response = SwitchPingResponse {
            protocol_version: 22,
            path_label,
        }
        .to_bytes()
        .to_vec();
        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: false,
                    payload: response,
                },
            )
            .await
            .unwrap();

        let stats = controller.peer_stats(remote_pub).unwrap();
        assert_eq!(stats.state, "Established");
        assert_eq!(stats.protocol_version, 22);

        let published = drain(&mut events);
        assert!(published
            .iter()
            .any(|e| e.kind == EventKind::Peer && e.path == path_label));
    }

    #[tokio::test]
    async fn test_scenario_lazy_ping() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock.clone(), vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());

        let key = [4u8; 32];
        let addr = LinkAddr(vec![9]);
        controller.bootstrap_peer(if_num, key, addr.clone(), b"pw").await.unwrap();
        transport.sent.lock().unwrap().clear();

        clock.set(3072);
        controller.ping_tick().await;
        assert_eq!(transport.sent.lock().unwrap().len(), 1, "exactly one ping sent");

        clock.set(3200);
        let response = SwitchPingResponse {
            protocol_version: 22,
            path_label: 0,
        }
        .to_bytes()
        .to_vec();
        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: false,
                    payload: response,
                },
            )
            .await
            .unwrap();

        let stats = controller.peer_stats(key).unwrap();
        assert_eq!(stats.time_of_last_ping, 3200);
    }

    #[tokio::test]
    async fn test_scenario_unresponsive_transition() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, bus) = make_controller(clock.clone(), vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());
        let mut events = bus.subscribe();

        let (remote_priv, key) = crate::crypto::x25519::generate_keypair();
        let addr = LinkAddr(vec![1]);
        controller.bootstrap_peer(if_num, key, addr.clone(), b"pw").await.unwrap();
        complete_bootstrap_handshake(&mut controller, if_num, &transport, addr, remote_priv, 55).await;
        drain(&mut events);

        // time_of_last_message was set to 0 when the handshake response
        // landed, so unresponsiveAfter's strict ">" needs one more ms.
        clock.set(20_481);
        controller.ping_tick().await;

        let stats = controller.peer_stats(key).unwrap();
        assert_eq!(stats.state, "Unresponsive");
        let published = drain(&mut events);
        assert_eq!(published.iter().filter(|e| e.kind == EventKind::PeerGone).count(), 1);

        clock.set(21_504);
        controller.ping_tick().await;
        let stats2 = controller.peer_stats(key).unwrap();
        assert_eq!(stats2.ping_count, stats.ping_count + 1, "pingCount % 8 != 0, no ping, but it still increments");
        let published2 = drain(&mut events);
        assert!(published2.iter().all(|e| e.kind != EventKind::PeerGone), "no repeated Peer-Gone while already down");
    }

    #[tokio::test]
    async fn test_scenario_forget_incoming() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, switch, bus) = make_controller(clock.clone(), vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());
        let mut events = bus.subscribe();

        let (remote_priv, remote_pub) = crate::crypto::x25519::generate_keypair();
        let controller_pub = controller.local_public_key();
        let mut remote = NoiseSession::outbound(remote_priv, controller_pub, 77);
        remote.begin_handshake().unwrap();
        let initiation = remote.take_outbound_handshake().unwrap();

        let addr = LinkAddr(vec![5]);
        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: false,
                    payload: initiation,
                },
            )
            .await
            .unwrap();

        assert!(controller.peer_stats(remote_pub).is_some());
        drain(&mut events);

        // Well past forgetAfter (262144 ms) for a peer admitted at t=0.
        clock.set(262_145);
        controller.ping_tick().await;

        assert!(controller.peer_stats(remote_pub).is_none());
        assert_eq!(switch.len(), 0, "the forgotten peer's switch slot is released");
        let published = drain(&mut events);
        assert_eq!(published.iter().filter(|e| e.kind == EventKind::PeerGone).count(), 1);
    }

    #[tokio::test]
    async fn test_scenario_beacon_dedup() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, _switch, _bus) = make_controller(clock, vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport);
        controller.set_beacon_state(if_num, BeaconMode::Accept).await.unwrap();

        let beacon = Beacon {
            public_key: [3u8; 32],
            protocol_version: 22,
            password: [7u8; 16],
        }
        .to_bytes()
        .to_vec();
        let addr = LinkAddr(vec![2]);

        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr.clone(),
                    broadcast: true,
                    payload: beacon.clone(),
                },
            )
            .await
            .unwrap();
        let first = controller.peer_stats([3u8; 32]).unwrap();

        controller
            .handle_inbound(
                if_num,
                InboundFrame {
                    from: addr,
                    broadcast: true,
                    payload: beacon,
                },
            )
            .await
            .unwrap();
        let second = controller.peer_stats([3u8; 32]).unwrap();

        assert_eq!(first.path_label, second.path_label, "duplicate beacon updates the existing peer, not a new one");
    }

    #[tokio::test]
    async fn test_scenario_relocation() {
        let clock = Arc::new(FakeClock::new(0));
        let (mut controller, switch, bus) = make_controller(clock.clone(), vec![0]);
        let transport = Arc::new(RecordingTransport::new());
        let if_num = controller.new_interface("eth0", transport.clone());
        let mut events = bus.subscribe();

        let (remote_priv, remote_pub) = crate::crypto::x25519::generate_keypair();
        let addr1 = LinkAddr(vec![1]);
        let addr2 = LinkAddr(vec![2]);

        establish_remote_peer(&mut controller, if_num, &transport, addr1, remote_priv, 10).await;
        let stats1 = controller.peer_stats(remote_pub).unwrap();
        drain(&mut events);

        establish_remote_peer(&mut controller, if_num, &transport, addr2, remote_priv, 20).await;
        let stats2 = controller.peer_stats(remote_pub).unwrap();

        assert_eq!(stats2.path_label, stats1.path_label, "relocation transplants the older path label");
        assert_eq!(switch.len(), 1, "the retired session's switch slot is released");

        let published = drain(&mut events);
        assert!(
            published
                .iter()
                .any(|e| e.kind == EventKind::PeerGone && e.public_key == remote_pub),
            "relocation publishes a gone event for the retired session"
        );
        assert!(
            published
                .iter()
                .any(|e| e.kind == EventKind::Peer && e.public_key == remote_pub && e.path == stats2.path_label),
            "relocation republishes established for the surviving session"
        );
    }
}
