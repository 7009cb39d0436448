use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let row: Option<(String, String, String, String)> = {
        let db = state.inner.db.lock().await;
        db.query_row(
            "SELECT id, org_id, password_hash, role FROM users WHERE email = ?1",
            [&req.email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .ok()
    };

    let (user_id, org_id, password_hash, role) =
        row.ok_or_else(|| ApiError::Unauthorized("Invalid credentials".into()))?;
    if !auth::verify_password(&req.password, &password_hash) {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let settings = &state.inner.settings;
    let access = auth::create_access_token(
        &user_id,
        &org_id,
        &role,
        &settings.jwt_secret,
        settings.access_minutes,
    )?;
    let refresh =
        auth::create_refresh_token(&user_id, &settings.jwt_secret, settings.refresh_days)?;

    Ok(Json(TokenResponse { access_token: access, refresh_token: refresh, token_type: "bearer" }))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let settings = &state.inner.settings;
    let claims = auth::decode_token(&req.refresh_token, &settings.jwt_secret)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired refresh token".into()))?;
    if claims.token_type != "refresh" {
        return Err(ApiError::Unauthorized("Invalid token type".into()));
    }

    let row: Option<(String, String)> = {
        let db = state.inner.db.lock().await;
        db.query_row(
            "SELECT org_id, role FROM users WHERE id = ?1",
            [&claims.sub],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()
    };
    let (org_id, role) = row.ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    let access = auth::create_access_token(
        &claims.sub,
        &org_id,
        &role,
        &settings.jwt_secret,
        settings.access_minutes,
    )?;
    let refresh =
        auth::create_refresh_token(&claims.sub, &settings.jwt_secret, settings.refresh_days)?;

    Ok(Json(TokenResponse { access_token: access, refresh_token: refresh, token_type: "bearer" }))
}
