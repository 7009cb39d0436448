use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use super::state::AppState;

/// Authenticated caller, extracted from the bearer access token. Every
/// org-scoped query keys off `org_id`; a token for org A can never see
/// org B's rows.
pub struct AuthUser {
    pub user_id: String,
    pub org_id: String,
    pub role: String,
}

impl AuthUser {
    pub fn require_role(&self, roles: &[&str]) -> Result<(), ApiError> {
        if roles.contains(&self.role.as_str()) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Insufficient role".into()))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Invalid authorization format".into()))?;

        let claims = super::auth::decode_access_token(token, &state.inner.settings.jwt_secret)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

        Ok(AuthUser {
            user_id: claims.sub,
            org_id: claims.org.unwrap_or_default(),
            role: claims.role.unwrap_or_else(|| "viewer".into()),
        })
    }
}
