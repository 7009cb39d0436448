use anyhow::{Context, Result, bail};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

// ── Password hashing (bcrypt) ──────────────────────────

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, 12).context("hashing password")
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ── JWT ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub iat: usize,
    pub exp: usize,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub fn create_access_token(
    user_id: &str,
    org_id: &str,
    role: &str,
    secret: &str,
    minutes: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        org: Some(org_id.to_string()),
        role: Some(role.to_string()),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::minutes(minutes)).timestamp() as usize,
        token_type: "access".into(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .context("creating access token")
}

pub fn create_refresh_token(user_id: &str, secret: &str, days: i64) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        org: None,
        role: None,
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::days(days)).timestamp() as usize,
        token_type: "refresh".into(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .context("creating refresh token")
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("invalid token")?;
    Ok(data.claims)
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims> {
    let claims = decode_token(token, secret)?;
    if claims.token_type != "access" {
        bail!("not an access token");
    }
    if claims.org.is_none() {
        bail!("access token missing org claim");
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips_org_and_role() {
        let token = create_access_token("u1", "org1", "admin", "s3cret", 15).unwrap();
        let claims = decode_access_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.org.as_deref(), Some("org1"));
        assert_eq!(claims.role.as_deref(), Some("admin"));
    }

    #[test]
    fn refresh_token_is_rejected_as_access() {
        let token = create_refresh_token("u1", "s3cret", 7).unwrap();
        assert!(decode_access_token(&token, "s3cret").is_err());
        let claims = decode_token(&token, "s3cret").unwrap();
        assert_eq!(claims.token_type, "refresh");
    }

    #[test]
    fn wrong_secret_fails() {
        let token = create_access_token("u1", "org1", "admin", "s3cret", 15).unwrap();
        assert!(decode_token(&token, "other").is_err());
    }
}
