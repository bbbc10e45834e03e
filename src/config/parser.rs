//! Mesh controller configuration file parser
//!
//! Parses `[Interface]`/`[Peer]` section files in the same key=value style
//! as a WireGuard `.conf`, but for this controller's own fields: local
//! identity and bind address, tuning overrides, and a static bootstrap
//! peer list.

use std::net::SocketAddr;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::controller::TuningConstants;
use crate::error::ConfigError;

/// Complete controller configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

/// Local (our-side) configuration.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub private_key: [u8; 32],
    pub listen_addr: SocketAddr,
    pub broadcast_addr: Option<SocketAddr>,
    pub beacon_password: [u8; 16],
    pub protocol_version: u32,
    pub tuning: TuningConstants,
}

/// A statically configured bootstrap peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub public_key: [u8; 32],
    pub endpoint: SocketAddr,
    pub password: Vec<u8>,
}

impl MeshConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut interface: Option<PartialInterface> = None;
        let mut peers: Vec<PeerConfig> = Vec::new();
        let mut current_section: Option<Section> = None;
        let mut current_peer: Option<PeerBuilder> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[interface]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build(line_num)?);
                }
                current_section = Some(Section::Interface);
                continue;
            } else if line.eq_ignore_ascii_case("[peer]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build(line_num)?);
                }
                current_section = Some(Section::Peer);
                current_peer = Some(PeerBuilder::default());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("expected 'key = value', got: {line}"),
                });
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Interface) => {
                    let iface = interface.get_or_insert_with(PartialInterface::default);
                    apply_interface_key(iface, &key, value, line_num)?;
                }
                Some(Section::Peer) => {
                    let peer = current_peer.as_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "peer value outside of [Peer] section".to_string(),
                    })?;
                    apply_peer_key(peer, &key, value, line_num)?;
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        if let Some(peer) = current_peer.take() {
            peers.push(peer.build(content.lines().count())?);
        }

        let interface = interface
            .ok_or(ConfigError::MissingField {
                field: "[Interface] section".to_string(),
            })?
            .build()?;

        Ok(MeshConfig { interface, peers })
    }

    pub fn public_key(&self) -> [u8; 32] {
        crate::crypto::x25519::public_key(&self.interface.private_key)
    }
}

#[derive(Clone, Copy)]
enum Section {
    Interface,
    Peer,
}

#[derive(Default)]
struct PartialInterface {
    private_key: Option<[u8; 32]>,
    listen_addr: Option<SocketAddr>,
    broadcast_addr: Option<SocketAddr>,
    beacon_password: Option<[u8; 16]>,
    protocol_version: Option<u32>,
    tuning: TuningConstants,
}

impl PartialInterface {
    fn build(self) -> Result<InterfaceConfig, ConfigError> {
        Ok(InterfaceConfig {
            private_key: self.private_key.ok_or(ConfigError::MissingField {
                field: "PrivateKey".to_string(),
            })?,
            listen_addr: self.listen_addr.ok_or(ConfigError::MissingField {
                field: "ListenAddr".to_string(),
            })?,
            broadcast_addr: self.broadcast_addr,
            beacon_password: self.beacon_password.unwrap_or([0u8; 16]),
            protocol_version: self.protocol_version.unwrap_or(1),
            tuning: self.tuning,
        })
    }
}

fn apply_interface_key(
    iface: &mut PartialInterface,
    key: &str,
    value: &str,
    line_num: usize,
) -> Result<(), ConfigError> {
    match key {
        "privatekey" => iface.private_key = Some(parse_key32(value, "PrivateKey")?),
        "listenaddr" => iface.listen_addr = Some(parse_endpoint(value, line_num)?),
        "broadcastaddr" => iface.broadcast_addr = Some(parse_endpoint(value, line_num)?),
        "beaconpassword" => iface.beacon_password = Some(parse_key16(value, "BeaconPassword")?),
        "protocolversion" => {
            iface.protocol_version = Some(value.parse().map_err(|_| ConfigError::ParseError {
                line: line_num,
                message: format!("invalid ProtocolVersion: {value}"),
            })?)
        }
        "unresponsiveafter" => iface.tuning.unresponsive_after = parse_ms(value, line_num)?,
        "pingafter" => iface.tuning.ping_after = parse_ms(value, line_num)?,
        "pinginterval" => iface.tuning.ping_interval = parse_ms(value, line_num)?,
        "timeout" => iface.tuning.timeout = parse_ms(value, line_num)?,
        "forgetafter" => iface.tuning.forget_after = parse_ms(value, line_num)?,
        "beaconinterval" => iface.tuning.beacon_interval = parse_ms(value, line_num)?,
        _ => tracing::debug!(%key, "unknown interface key, ignoring"),
    }
    Ok(())
}

fn apply_peer_key(peer: &mut PeerBuilder, key: &str, value: &str, line_num: usize) -> Result<(), ConfigError> {
    match key {
        "publickey" => peer.public_key = Some(parse_key32(value, "PublicKey")?),
        "endpoint" => peer.endpoint = Some(parse_endpoint(value, line_num)?),
        "password" => peer.password = Some(value.as_bytes().to_vec()),
        _ => tracing::debug!(%key, "unknown peer key, ignoring"),
    }
    Ok(())
}

#[derive(Default)]
struct PeerBuilder {
    public_key: Option<[u8; 32]>,
    endpoint: Option<SocketAddr>,
    password: Option<Vec<u8>>,
}

impl PeerBuilder {
    fn build(self, line_num: usize) -> Result<PeerConfig, ConfigError> {
        let public_key = self.public_key.ok_or(ConfigError::MissingField {
            field: "PublicKey in [Peer]".to_string(),
        })?;
        let endpoint = self.endpoint.ok_or(ConfigError::MissingField {
            field: "Endpoint in [Peer]".to_string(),
        })?;
        let _ = line_num;
        Ok(PeerConfig {
            public_key,
            endpoint,
            password: self.password.unwrap_or_default(),
        })
    }
}

fn parse_key32(value: &str, field_name: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

fn parse_key16(value: &str, field_name: &str) -> Result<[u8; 16], ConfigError> {
    let bytes = BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

fn parse_ms(value: &str, line_num: usize) -> Result<i64, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line: line_num,
        message: format!("invalid millisecond value: {value}"),
    })
}

fn parse_endpoint(value: &str, line_num: usize) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line: line_num,
        message: format!("invalid address: {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG: &str = r#"
[Interface]
PrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=
ListenAddr = 0.0.0.0:4500
BroadcastAddr = 255.255.255.255:4500
ProtocolVersion = 3

[Peer]
PublicKey = YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=
Endpoint = 10.0.0.5:4500
Password = hunter2
"#;

    #[test]
    fn test_parse_config() {
        let config = MeshConfig::parse(TEST_CONFIG).unwrap();
        assert_eq!(config.interface.listen_addr.to_string(), "0.0.0.0:4500");
        assert_eq!(config.interface.protocol_version, 3);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].endpoint.to_string(), "10.0.0.5:4500");
        assert_eq!(config.peers[0].password, b"hunter2");
    }

    #[test]
    fn test_tuning_override() {
        let content = format!("{TEST_CONFIG}\nPingInterval = 512\n");
        // PingInterval placed after the [Peer] section applies to the peer
        // parser's unknown-key path and is ignored; put it in [Interface].
        let with_override = TEST_CONFIG.replacen(
            "ProtocolVersion = 3",
            "ProtocolVersion = 3\nPingInterval = 512",
            1,
        );
        let config = MeshConfig::parse(&with_override).unwrap();
        assert_eq!(config.interface.tuning.ping_interval, 512);
        let _ = content;
    }

    #[test]
    fn test_missing_private_key() {
        let config = "[Interface]\nListenAddr = 0.0.0.0:4500\n";
        assert!(MeshConfig::parse(config).is_err());
    }

    #[test]
    fn test_missing_peer_endpoint() {
        let config = format!(
            "{}\n[Peer]\nPublicKey = YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=\n",
            "[Interface]\nPrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=\nListenAddr = 0.0.0.0:4500"
        );
        assert!(MeshConfig::parse(&config).is_err());
    }
}
