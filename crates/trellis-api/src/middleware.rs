use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

/// Extract and validate the signed session token from the `session`
/// cookie. The token resolves to a user id on every request; there is no
/// server-side session table.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_cookie)
        .ok_or_else(missing_token)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| missing_token())?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

fn missing_token() -> ApiError {
    ApiError::Unauthorized("Missing or invalid session token".into())
}

fn session_cookie(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("session=").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_session_among_other_cookies() {
        assert_eq!(
            session_cookie("theme=dark; session=abc.def.ghi; lang=en"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(session_cookie("theme=dark"), None);
    }
}
