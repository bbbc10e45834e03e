//! Admin HTTP API: the operator surface over a running `Controller`.
//!
//! Mirrors the daemon's REST-over-axum shape, but every handler delegates
//! straight to `Controller` methods instead of driving a client/server
//! split — there is exactly one control plane here.

pub mod routes;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::controller::Controller;
use crate::eventbus::InMemoryEventBus;

/// Shared application state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Mutex<Controller>>,
    pub events: Arc<InMemoryEventBus>,
}

impl AppState {
    pub fn new(controller: Arc<Mutex<Controller>>, events: Arc<InMemoryEventBus>) -> Self {
        Self { controller, events }
    }
}
