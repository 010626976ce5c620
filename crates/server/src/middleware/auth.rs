use crate::api::ApiError;
use anyhow::anyhow;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by a caller token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerClaims {
    /// Calling service, for logs
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
}

/// Verifies HS256 caller tokens signed with the worker secret
pub struct CallerAuth {
    key: DecodingKey,
    validation: Validation,
}

impl CallerAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<CallerClaims, jsonwebtoken::errors::Error> {
        decode::<CallerClaims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Reject requests without a valid caller token
pub async fn require_caller(
    State(auth): State<Arc<CallerAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::unauthorized(anyhow!("missing bearer token")).into_response();
    };

    match auth.verify(token) {
        Ok(claims) => {
            tracing::debug!(caller = claims.sub.as_deref().unwrap_or("-"), "caller authenticated");
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!("Rejected caller token: {}", e);
            ApiError::unauthorized(anyhow!("invalid bearer token")).into_response()
        }
    }
}
