//! Configuration parsing for the mesh link controller
//!
//! Handles parsing of `[Interface]`/`[Peer]` config files describing the
//! local identity, tuning overrides, and static bootstrap peers.

mod parser;

pub use parser::{InterfaceConfig, MeshConfig, PeerConfig};
