use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{extract::State, http::header, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use trellis_types::api::{LoginRequest, LoginResponse, RegisterRequest};

use crate::AppState;
use crate::error::{ApiError, ApiJson, success};
use crate::middleware::Claims;

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim();
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::BadRequest(
            "Username must be 3-32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }

    if state.db.get_user_by_username(username)?.is_some() {
        return Err(ApiError::Conflict("Username already exists".into()));
    }

    // Hash with Argon2id; only the PHC string is stored.
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    state
        .db
        .create_user(&user_id.to_string(), username, &password_hash)?;

    tracing::info!(username, "user registered");
    Ok(success("Registration successful"))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password required".into()));
    }

    let user = state
        .db
        .get_user_by_username(username)?
        .ok_or_else(invalid_credentials)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| ApiError::Internal(anyhow!("corrupt password hash: {}", e)))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid_credentials())?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow!("corrupt user id '{}': {}", user.id, e)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;
    let cookie = format!("session={}; Path=/; HttpOnly; SameSite=Lax", token);

    tracing::info!(username, "user logged in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        axum::Json(LoginResponse {
            status: "success".into(),
            message: "Login successful".into(),
            user_id,
            username: user.username,
        }),
    ))
}

fn invalid_credentials() -> ApiError {
    // Deliberately the same answer for unknown user and wrong password.
    ApiError::Unauthorized("Invalid username or password".into())
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow!("token encoding failed: {}", e)))
}
