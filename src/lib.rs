//! A peer link controller for a mesh overlay router.
//!
//! Owns per-peer authenticated, encrypted sessions over one or more
//! link-layer transports: handshakes new peers in from beacons or
//! unsolicited frames, tracks liveness with a ping tick, and bridges
//! decrypted packets to and from an externally contracted packet switch.
//!
//! # Usage
//!
//! ```no_run
//! use meshlinkd::controller::{Controller, TuningConstants};
//! use meshlinkd::clock::SystemClock;
//! use meshlinkd::rng::SystemRng;
//! use meshlinkd::switch::InMemorySwitch;
//! use meshlinkd::eventbus::InMemoryEventBus;
//! use std::sync::Arc;
//!
//! # fn make_key() -> [u8; 32] { [0u8; 32] }
//! let _controller = Controller::new(
//!     Arc::new(InMemorySwitch::new(1024)),
//!     Arc::new(InMemoryEventBus::new()),
//!     Arc::new(SystemClock),
//!     Box::new(SystemRng),
//!     make_key(),
//!     [0u8; 16],
//!     1,
//!     TuningConstants::default(),
//! );
//! ```

pub mod admin;
pub mod clock;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod eventbus;
pub mod link;
pub mod peer;
pub mod protocol;
pub mod rng;
pub mod switch;
pub mod transport_link;

pub use controller::{Controller, TuningConstants};
pub use error::MeshError;
