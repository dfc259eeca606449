use anyhow::anyhow;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::{error, info};
use uuid::Uuid;

use trellis_types::api::{ChannelNameRequest, DmHistoryRequest, LogDmRequest, LogMessageRequest};
use trellis_types::models::{ChannelHistoryEntry, DmHistoryEntry};

use crate::error::{ApiError, ApiJson, success};
use crate::middleware::Claims;
use crate::{AppState, check_channel_access};

/// History replies carry at most the 100 most recent entries.
const HISTORY_LIMIT: u32 = 100;

pub async fn log_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<LogMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_name = req.channel_name.trim().to_string();
    let content = req.content.trim().to_string();
    if channel_name.is_empty() || content.is_empty() {
        return Err(ApiError::BadRequest("Missing fields".into()));
    }

    let channel = state
        .db
        .get_channel_by_name(&channel_name)?
        .ok_or_else(|| ApiError::NotFound("Channel not found".into()))?;

    check_channel_access(&state, &channel, &claims.sub.to_string())?;

    // Run the blocking insert off the async runtime.
    let db = state.clone();
    let user_id = claims.sub.to_string();
    tokio::task::spawn_blocking(move || {
        db.db.insert_channel_message(
            &Uuid::new_v4().to_string(),
            &channel.id,
            &user_id,
            &content,
            &trellis_db::now_utc(),
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow!("join error: {}", e))
    })??;

    info!(username = %claims.username, channel = %channel_name, "message logged");
    Ok(success("Message sent"))
}

pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ChannelNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_name = req.channel_name.trim();
    if channel_name.is_empty() {
        return Err(ApiError::BadRequest("Channel name required".into()));
    }

    let channel = state
        .db
        .get_channel_by_name(channel_name)?
        .ok_or_else(|| ApiError::NotFound("Channel not found".into()))?;

    check_channel_access(&state, &channel, &claims.sub.to_string())?;

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.channel_history(&channel.id, HISTORY_LIMIT))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("join error: {}", e))
        })??;

    let entries: Vec<ChannelHistoryEntry> = rows
        .into_iter()
        .map(|row| ChannelHistoryEntry {
            content: row.content,
            username: row.username,
            timestamp: row.timestamp,
        })
        .collect();

    Ok(Json(entries))
}

pub async fn log_dm(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<LogDmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receiver_name = req.receiver.trim();
    let content = req.content.trim().to_string();
    if receiver_name.is_empty() || content.is_empty() {
        return Err(ApiError::BadRequest("Missing fields".into()));
    }

    let receiver = state
        .db
        .get_user_by_username(receiver_name)?
        .ok_or_else(|| ApiError::NotFound("Receiver not found".into()))?;

    state.db.insert_direct_message(
        &Uuid::new_v4().to_string(),
        &claims.sub.to_string(),
        &receiver.id,
        &content,
        &trellis_db::now_utc(),
    )?;

    info!(sender = %claims.username, receiver = receiver_name, "dm logged");
    Ok(success("DM sent"))
}

/// DM history is unrestricted between any two registered users; either
/// participant sees the identical transcript.
pub async fn get_dm_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<DmHistoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let other_name = req.other_user.trim();
    if other_name.is_empty() {
        return Err(ApiError::BadRequest("Other user required".into()));
    }

    let other = state
        .db
        .get_user_by_username(other_name)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let db = state.clone();
    let caller_id = claims.sub.to_string();
    let rows =
        tokio::task::spawn_blocking(move || db.db.dm_history(&caller_id, &other.id, HISTORY_LIMIT))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow!("join error: {}", e))
            })??;

    let entries: Vec<DmHistoryEntry> = rows
        .into_iter()
        .map(|row| DmHistoryEntry {
            content: row.content,
            sender: row.sender,
            receiver: row.receiver,
            timestamp: row.timestamp,
        })
        .collect();

    Ok(Json(entries))
}
