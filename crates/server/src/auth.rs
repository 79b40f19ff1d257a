use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::error::{ApiError, ErrorCode};
use uuid::Uuid;

use crate::app_state::{http_error, AppState, HttpError};

pub const MIN_SYMMETRIC_KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub symmetric_key: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn issue_token(
    cfg: &TokenConfig,
    username: &str,
    role: &str,
    kind: TokenKind,
) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
    let ttl = match kind {
        TokenKind::Access => cfg.access_ttl_seconds,
        TokenKind::Refresh => cfg.refresh_ttl_seconds,
    };
    let now = Utc::now();
    let expires_at = now + Duration::seconds(ttl);
    let claims = Claims {
        sub: username.to_string(),
        role: role.to_string(),
        kind,
        jti: Uuid::new_v4(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.symmetric_key.as_bytes()),
    )?;
    Ok(IssuedToken { token, expires_at })
}

/// Decodes `token` and checks signature, expiry and that it is a `kind` token.
pub fn verify_token(cfg: &TokenConfig, token: &str, kind: TokenKind) -> Result<Claims, ApiError> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.symmetric_key.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError::new(ErrorCode::Unauthorized, format!("invalid token: {e}")))?;
    if decoded.claims.kind != kind {
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "token is not valid for this purpose",
        ));
    }
    Ok(decoded.claims)
}

/// Caller identity taken from an `Authorization: Bearer <access token>` header.
pub(crate) struct AuthUser(pub(crate) Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized = |message: &str| http_error(ApiError::new(ErrorCode::Unauthorized, message));

        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| unauthorized("authorization header is not provided"))?
            .to_str()
            .map_err(|_| unauthorized("invalid authorization header format"))?;
        let mut fields = value.split_whitespace();
        let (Some(scheme), Some(token), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(unauthorized("invalid authorization header format"));
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(unauthorized("unsupported authorization type"));
        }

        verify_token(&state.tokens, token, TokenKind::Access)
            .map(AuthUser)
            .map_err(http_error)
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
