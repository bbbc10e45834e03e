//! REST route handlers for the admin API.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use crate::error::AdminError;
use crate::link::BeaconMode;
use crate::transport_link::{LinkAddr, UdpTransport};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        Self {
            code: e.as_code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            -1 | -3 => StatusCode::NOT_FOUND,
            -2 => StatusCode::BAD_REQUEST,
            -4 => StatusCode::NOT_FOUND,
            -5 => StatusCode::CONFLICT,
            -6 => StatusCode::INSUFFICIENT_STORAGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/interfaces", post(handle_new_iface))
        .route("/api/v1/interfaces/:if_num/beacon", post(handle_beacon_state))
        .route("/api/v1/peers/bootstrap", post(handle_bootstrap_peer))
        .route("/api/v1/peers/:pubkey", delete(handle_disconnect_peer))
        .route("/api/v1/peers/:pubkey/stats", get(handle_peer_stats))
        .route("/api/v1/events", get(handle_events_sse))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn decode_hex32(s: &str) -> Result<[u8; 32], ApiError> {
    let bytes = hex::decode(s).map_err(|_| ApiError {
        code: AdminError::BadKey.as_code(),
        message: "public key must be 64 hex characters".into(),
    })?;
    bytes.try_into().map_err(|_| ApiError {
        code: AdminError::BadKey.as_code(),
        message: "public key must decode to exactly 32 bytes".into(),
    })
}

#[derive(Debug, Deserialize)]
pub struct NewIfaceRequest {
    pub name: String,
    pub bind_addr: String,
    pub broadcast_addr: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewIfaceResponse {
    pub if_num: u32,
}

/// POST /api/v1/interfaces — newIface
pub async fn handle_new_iface(
    State(state): State<AppState>,
    Json(request): Json<NewIfaceRequest>,
) -> Result<Json<NewIfaceResponse>, ApiError> {
    let bind: SocketAddr = request.bind_addr.parse().map_err(|_| ApiError {
        code: AdminError::BadIfnum { ifnum: 0 }.as_code(),
        message: "invalid bind_addr".into(),
    })?;

    let mut transport = UdpTransport::bind(bind).await.map_err(|_| ApiError {
        code: AdminError::Internal {
            reason: "failed to bind transport".into(),
        }
        .as_code(),
        message: "failed to bind transport socket".into(),
    })?;

    if let Some(b) = request.broadcast_addr {
        let addr: SocketAddr = b.parse().map_err(|_| ApiError {
            code: AdminError::BadIfnum { ifnum: 0 }.as_code(),
            message: "invalid broadcast_addr".into(),
        })?;
        transport = transport.with_broadcast_addr(addr);
    }

    let mut controller = state.controller.lock().await;
    let if_num = controller.new_interface(&request.name, Arc::new(transport));
    Ok(Json(NewIfaceResponse { if_num }))
}

#[derive(Debug, Deserialize)]
pub struct BeaconStateRequest {
    pub mode: String,
}

/// POST /api/v1/interfaces/:if_num/beacon — beaconState
pub async fn handle_beacon_state(
    State(state): State<AppState>,
    Path(if_num): Path<u32>,
    Json(request): Json<BeaconStateRequest>,
) -> Result<StatusCode, ApiError> {
    let mode = match request.mode.as_str() {
        "off" => BeaconMode::Off,
        "accept" => BeaconMode::Accept,
        "send" => BeaconMode::Send,
        _ => {
            return Err(ApiError {
                code: AdminError::InvalidState.as_code(),
                message: "mode must be one of off, accept, send".into(),
            })
        }
    };

    let mut controller = state.controller.lock().await;
    controller.set_beacon_state(if_num, mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BootstrapPeerRequest {
    pub if_num: u32,
    pub public_key: String,
    pub lladdr: String,
    pub password: String,
}

/// POST /api/v1/peers/bootstrap — bootstrapPeer
pub async fn handle_bootstrap_peer(
    State(state): State<AppState>,
    Json(request): Json<BootstrapPeerRequest>,
) -> Result<StatusCode, ApiError> {
    let key = decode_hex32(&request.public_key)?;
    let addr: SocketAddr = request.lladdr.parse().map_err(|_| ApiError {
        code: AdminError::BadKey.as_code(),
        message: "invalid lladdr".into(),
    })?;
    let lladdr = LinkAddr::from_socket_addr(addr);

    let mut controller = state.controller.lock().await;
    controller
        .bootstrap_peer(request.if_num, key, lladdr, request.password.as_bytes())
        .await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/peers/:pubkey — disconnectPeer
pub async fn handle_disconnect_peer(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = decode_hex32(&pubkey)?;
    let mut controller = state.controller.lock().await;
    controller.disconnect_peer(key)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct PeerStatsResponse {
    pub if_num: u32,
    pub public_key: String,
    pub ip6: Option<String>,
    pub path_label: u64,
    pub state: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub ping_count: u64,
    pub is_incoming: bool,
    pub replay_duplicates: u64,
    pub replay_lost: u64,
    pub replay_out_of_range: u64,
}

/// GET /api/v1/peers/:pubkey/stats — getPeerStats
pub async fn handle_peer_stats(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
) -> Result<Json<PeerStatsResponse>, ApiError> {
    let key = decode_hex32(&pubkey)?;
    let controller = state.controller.lock().await;
    let stats = controller.peer_stats(key).ok_or(ApiError {
        code: AdminError::NotFound.as_code(),
        message: "peer not found".into(),
    })?;

    Ok(Json(PeerStatsResponse {
        if_num: stats.if_num,
        public_key: hex::encode(stats.public_key),
        ip6: stats.ip6.map(hex::encode),
        path_label: stats.path_label,
        state: stats.state,
        bytes_in: stats.bytes_in,
        bytes_out: stats.bytes_out,
        ping_count: stats.ping_count,
        is_incoming: stats.is_incoming,
        replay_duplicates: stats.replay_duplicates,
        replay_lost: stats.replay_lost,
        replay_out_of_range: stats.replay_out_of_range,
    }))
}

/// GET /api/v1/events — SSE stream of peer up/down notifications.
pub async fn handle_events_sse(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        result.ok().and_then(|event| {
            serde_json::to_string(&event)
                .ok()
                .map(|payload| Ok(Event::default().data(payload)))
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
