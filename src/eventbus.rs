//! The event bus: notifies routing components of peer up/down and answers
//! pathfinder peer-enumeration queries.
//!
//! Out of scope as a core concern — accessed only through `EventBus`.
//! `InMemoryEventBus` is the fake used by tests and by the admin SSE
//! stream (`admin::routes`) in the standalone binary.

use tokio::sync::broadcast;

/// `0xffffffff` in the wire format: a broadcast query with no specific
/// pathfinder as the target.
pub const PATHFINDER_BROADCAST: u32 = 0xffffffff;

/// `0xffffffff` in the metric field: the peer is directly connected.
pub const METRIC_DIRECT: u32 = 0xffffffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Peer,
    PeerGone,
}

/// One peer up/down notification, matching the wire layout of §6's
/// `struct` body (ip6, publicKey, path, metric, version).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeerEvent {
    pub kind: EventKind,
    pub pathfinder_id: u32,
    #[serde(serialize_with = "ser_hex16")]
    pub ip6: [u8; 16],
    #[serde(serialize_with = "ser_hex32")]
    pub public_key: [u8; 32],
    pub path: u64,
    pub metric: u32,
    pub version: u32,
}

fn ser_hex16<S: serde::Serializer>(bytes: &[u8; 16], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

fn ser_hex32<S: serde::Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

impl PeerEvent {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 16 + 32 + 8 + 4 + 4);
        buf.extend_from_slice(&(self.kind as u32).to_le_bytes());
        buf.extend_from_slice(&self.pathfinder_id.to_le_bytes());
        buf.extend_from_slice(&self.ip6);
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.path.to_be_bytes());
        buf.extend_from_slice(&self.metric.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf
    }
}

/// Publishes peer lifecycle notifications and answers pathfinder queries.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: PeerEvent);

    /// Snapshot of the peers currently known, for a pathfinder's
    /// broadcast enumerate query.
    fn enumerate(&self) -> Vec<PeerEvent>;
}

/// In-process bus: a broadcast channel for live subscribers (the admin
/// SSE stream) plus a snapshot table for `enumerate`.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<PeerEvent>,
    known: std::sync::Mutex<std::collections::HashMap<[u8; 32], PeerEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            known: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.sender.subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: PeerEvent) {
        let mut known = self.known.lock().unwrap();
        match event.kind {
            EventKind::Peer => {
                known.insert(event.public_key, event.clone());
            }
            EventKind::PeerGone => {
                known.remove(&event.public_key);
            }
        }
        drop(known);
        // No subscribers is a normal, not an error, condition.
        let _ = self.sender.send(event);
    }

    fn enumerate(&self) -> Vec<PeerEvent> {
        self.known.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: EventKind, key: u8) -> PeerEvent {
        PeerEvent {
            kind,
            pathfinder_id: PATHFINDER_BROADCAST,
            ip6: [0xfc; 16],
            public_key: [key; 32],
            path: 0xAAAA,
            metric: METRIC_DIRECT,
            version: 1,
        }
    }

    #[test]
    fn test_publish_peer_then_enumerate() {
        let bus = InMemoryEventBus::new();
        bus.publish(sample_event(EventKind::Peer, 1));
        let peers = bus.enumerate();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, [1u8; 32]);
    }

    #[test]
    fn test_peer_gone_removes_from_enumerate() {
        let bus = InMemoryEventBus::new();
        bus.publish(sample_event(EventKind::Peer, 2));
        bus.publish(sample_event(EventKind::PeerGone, 2));
        assert!(bus.enumerate().is_empty());
    }

    #[test]
    fn test_subscriber_receives_published_event() {
        let bus = InMemoryEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(sample_event(EventKind::Peer, 3));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.public_key, [3u8; 32]);
    }

    #[test]
    fn test_event_to_bytes_length() {
        let event = sample_event(EventKind::Peer, 4);
        assert_eq!(event.to_bytes().len(), 8 + 16 + 32 + 8 + 4 + 4);
    }
}
