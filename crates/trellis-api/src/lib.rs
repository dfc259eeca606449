pub mod auth;
pub mod channels;
pub mod error;
pub mod history;
pub mod middleware;
pub mod presence;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use trellis_db::Database;
use trellis_db::models::ChannelRow;
use trellis_types::access;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

/// The full tracker surface. Register, login, and health are public;
/// everything else requires a valid session cookie.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/health", get(presence::health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/submit-info/", post(presence::submit_info))
        .route("/get-list/", get(presence::get_list))
        .route("/logout/", post(presence::logout))
        .route("/create-channel/", post(channels::create_channel))
        .route("/list-channels/", get(channels::list_channels))
        .route("/add-channel-member/", post(channels::add_member))
        .route("/remove-channel-member/", post(channels::remove_member))
        .route("/get-channel-members/", post(channels::get_members))
        .route("/log-message/", post(history::log_message))
        .route("/get-history/", post(history::get_history))
        .route("/log-dm/", post(history::log_dm))
        .route("/get-dm-history/", post(history::get_dm_history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

/// The binding access decision, shared verbatim with the peer node's
/// advisory pre-flight: public channels admit everyone, private channels
/// admit the owner and explicit members. Identical for reads and writes.
pub(crate) fn check_channel_access(
    state: &AppState,
    channel: &ChannelRow,
    caller_id: &str,
) -> Result<(), ApiError> {
    let member_ids = state.db.channel_member_ids(&channel.id)?;
    let caller = caller_id.to_string();
    if access::evaluate(channel.is_private, &channel.owner_id, &member_ids, &caller).is_granted() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Access denied".into()))
    }
}
