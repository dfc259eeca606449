use thiserror::Error;

/// Failures surfaced by the peer node. Per-session delivery errors during
/// fan-out never show up here; those are counted and dropped.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("user '{0}' is not online")]
    UserOffline(String),
    #[error("tracker answered {status}: {message}")]
    Tracker { status: u16, message: String },
}
