use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use trellis_types::api::{ChannelNameRequest, CreateChannelRequest, MemberRequest};
use trellis_types::models::{ChannelMembers, ChannelSummary};

use crate::error::{ApiError, ApiJson, success};
use crate::middleware::Claims;
use crate::{AppState, check_channel_access};

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Channel name required".into()));
    }

    if state.db.get_channel_by_name(name)?.is_some() {
        return Err(ApiError::Conflict("Channel already exists".into()));
    }

    state.db.create_channel(
        &Uuid::new_v4().to_string(),
        name,
        req.topic.trim(),
        &claims.sub.to_string(),
        req.is_private,
        &req.allowed_users,
        &trellis_db::now_utc(),
    )?;

    info!(owner = %claims.username, channel = name, private = req.is_private, "channel created");
    Ok(success(format!("Channel '{}' created", name)))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let state2 = state.clone();
    let summaries = tokio::task::spawn_blocking(move || {
        let rows = state2.db.list_channels()?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            // allowed_users is only meaningful (and only disclosed) for
            // private channels.
            let allowed_users = if row.is_private {
                state2.db.channel_member_usernames(&row.id)?
            } else {
                Vec::new()
            };
            out.push(ChannelSummary {
                id: row.id,
                name: row.name,
                topic: row.topic,
                owner: row.owner_username,
                is_private: row.is_private,
                allowed_users,
            });
        }
        Ok::<_, anyhow::Error>(out)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("join error: {}", e)))??;

    Ok(Json(summaries))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_name = req.channel_name.trim();
    let username = req.username.trim();
    if channel_name.is_empty() || username.is_empty() {
        return Err(ApiError::BadRequest("Missing fields".into()));
    }

    let channel = state
        .db
        .get_channel_by_name(channel_name)?
        .ok_or_else(|| ApiError::NotFound("Channel not found".into()))?;

    if channel.owner_id != claims.sub.to_string() {
        return Err(ApiError::Forbidden("Only the owner can add members".into()));
    }
    if !channel.is_private {
        return Err(ApiError::BadRequest(
            "Cannot add members to a public channel".into(),
        ));
    }

    let user = state
        .db
        .get_user_by_username(username)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if state.db.is_channel_member(&channel.id, &user.id)? {
        return Err(ApiError::Conflict("User already a member".into()));
    }

    state
        .db
        .add_channel_member(&Uuid::new_v4().to_string(), &channel.id, &user.id)?;

    info!(owner = %claims.username, channel = channel_name, member = username, "member added");
    Ok(success(format!("Added {} to channel", username)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_name = req.channel_name.trim();
    let username = req.username.trim();
    if channel_name.is_empty() || username.is_empty() {
        return Err(ApiError::BadRequest("Missing fields".into()));
    }

    let channel = state
        .db
        .get_channel_by_name(channel_name)?
        .ok_or_else(|| ApiError::NotFound("Channel not found".into()))?;

    if channel.owner_id != claims.sub.to_string() {
        return Err(ApiError::Forbidden(
            "Only the owner can remove members".into(),
        ));
    }

    let user = state
        .db
        .get_user_by_username(username)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    state.db.remove_channel_member(&channel.id, &user.id)?;

    info!(owner = %claims.username, channel = channel_name, member = username, "member removed");
    Ok(success(format!("Removed {} from channel", username)))
}

pub async fn get_members(
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

    let members = state.db.channel_member_usernames(&channel.id)?;
    Ok(Json(ChannelMembers {
        owner: channel.owner_username,
        members,
    }))
}
