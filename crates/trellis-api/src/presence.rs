use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use trellis_types::api::{HealthResponse, LogoutRequest, SubmitInfoRequest};

use crate::AppState;
use crate::error::{ApiError, ApiJson, success};
use crate::middleware::Claims;

/// Register the caller's reachable endpoint. Replaying the same
/// (ip, port) for the same user replaces the existing row.
pub async fn submit_info(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SubmitInfoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.ip.trim().is_empty() || req.port == 0 {
        return Err(ApiError::BadRequest("Invalid peer info".into()));
    }

    state.db.upsert_peer(&claims.username, req.ip.trim(), req.port)?;

    info!(username = %claims.username, ip = %req.ip, port = req.port, "peer registered");
    Ok(success("Peer registered"))
}

/// The full presence snapshot, the caller's own rows included. Excluding
/// oneself is deliberately left to the caller.
pub async fn get_list(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let peers = state.db.list_peers()?;
    Ok(Json(peers))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<LogoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match (req.ip.as_deref(), req.port) {
        (Some(ip), Some(port)) => {
            state.db.remove_peer(&claims.username, Some((ip, port)))?;
            info!(username = %claims.username, ip, port, "peer unregistered");
        }
        _ => {
            state.db.remove_peer(&claims.username, None)?;
            info!(username = %claims.username, "all sessions unregistered");
        }
    }
    Ok(success("Logged out"))
}

pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.db.health_counts()?;
    Ok(Json(HealthResponse {
        status: "healthy".into(),
        peers_online: counts.peers_online,
        total_users: counts.total_users,
        total_channels: counts.total_channels,
        total_dms: counts.total_dms,
        server_time: trellis_db::now_utc(),
    }))
}
