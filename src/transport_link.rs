//! Link-layer transports the controller bridges peer traffic over.
//!
//! The controller never parses wire concerns specific to a transport; it
//! only ever calls `LinkTransport`, identifying peers by the opaque
//! `LinkAddr` the transport hands back on receive. `UdpTransport` is the
//! one concrete implementation shipped here.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::MeshError;

/// Opaque link-layer address, byte-compared by the caller. `LinkInterface`
/// never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkAddr(pub Vec<u8>);

impl LinkAddr {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => {
                let mut bytes = v4.ip().octets().to_vec();
                bytes.extend_from_slice(&v4.port().to_be_bytes());
                LinkAddr(bytes)
            }
            SocketAddr::V6(v6) => {
                let mut bytes = v6.ip().octets().to_vec();
                bytes.extend_from_slice(&v6.port().to_be_bytes());
                LinkAddr(bytes)
            }
        }
    }
}

/// A raw framed message delivered by a link-layer transport.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: LinkAddr,
    pub broadcast: bool,
    pub payload: Vec<u8>,
}

/// The lower link-layer transport a `LinkInterface` is registered over
/// (UDP, Ethernet, TUN, ...). Out of scope as a core concern.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Block until the next frame arrives.
    async fn recv(&self) -> Result<InboundFrame, MeshError>;

    /// Send a unicast frame to a known link address.
    async fn send_to(&self, to: &LinkAddr, payload: &[u8]) -> Result<(), MeshError>;

    /// Broadcast a frame (used for beacons on Send-mode links).
    async fn broadcast(&self, payload: &[u8]) -> Result<(), MeshError>;
}

/// UDP-backed transport. Every datagram it sends is unicast framing;
/// `broadcast()` instead sends once to a fixed subnet broadcast address
/// configured via `with_broadcast_addr`, since UDP has no native broadcast
/// across arbitrary peer sets. `recv()` cannot currently tell which local
/// address a datagram arrived on without platform-specific destination
/// tracking (`IP_PKTINFO`), so it always reports `broadcast: false`; a
/// link bound this way should run its beacon mode as `Accept` only on
/// links where every peer also announces itself via an unsolicited
/// handshake rather than relying on the wire beacon broadcast path.
pub struct UdpTransport {
    socket: UdpSocket,
    broadcast_addr: Option<SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, MeshError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(MeshError::System)?;
        Ok(Self {
            socket,
            broadcast_addr: None,
        })
    }

    /// Set the subnet broadcast address used by `broadcast()`.
    pub fn with_broadcast_addr(mut self, addr: SocketAddr) -> Self {
        self.broadcast_addr = Some(addr);
        self
    }
}

#[async_trait]
impl LinkTransport for UdpTransport {
    async fn recv(&self) -> Result<InboundFrame, MeshError> {
        let mut buf = vec![0u8; 65535];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(MeshError::System)?;
        buf.truncate(len);
        Ok(InboundFrame {
            from: LinkAddr::from_socket_addr(from),
            broadcast: false,
            payload: buf,
        })
    }

    async fn send_to(&self, to: &LinkAddr, payload: &[u8]) -> Result<(), MeshError> {
        let addr = decode_socket_addr(to)?;
        self.socket
            .send_to(payload, addr)
            .await
            .map_err(MeshError::System)?;
        Ok(())
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<(), MeshError> {
        let addr = self.broadcast_addr.ok_or_else(|| {
            MeshError::System(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no broadcast address configured for this interface",
            ))
        })?;
        self.socket
            .send_to(payload, addr)
            .await
            .map_err(MeshError::System)?;
        Ok(())
    }
}

fn decode_socket_addr(addr: &LinkAddr) -> Result<SocketAddr, MeshError> {
    match addr.0.len() {
        6 => {
            let ip = std::net::Ipv4Addr::new(addr.0[0], addr.0[1], addr.0[2], addr.0[3]);
            let port = u16::from_be_bytes([addr.0[4], addr.0[5]]);
            Ok(SocketAddr::from((ip, port)))
        }
        18 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&addr.0[..16]);
            let port = u16::from_be_bytes([addr.0[16], addr.0[17]]);
            Ok(SocketAddr::from((std::net::Ipv6Addr::from(octets), port)))
        }
        other => Err(MeshError::System(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("link address of length {other} does not decode to a UDP endpoint"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_addr_roundtrip_v4() {
        let addr: SocketAddr = "10.0.0.5:4500".parse().unwrap();
        let link = LinkAddr::from_socket_addr(addr);
        assert_eq!(link.0.len(), 6);
        let decoded = decode_socket_addr(&link).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn test_link_addr_roundtrip_v6() {
        let addr: SocketAddr = "[fc00::1]:4500".parse().unwrap();
        let link = LinkAddr::from_socket_addr(addr);
        assert_eq!(link.0.len(), 18);
        let decoded = decode_socket_addr(&link).unwrap();
        assert_eq!(decoded, addr);
    }
}
