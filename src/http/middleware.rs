//! Shared-secret guard for the administrative webhook

use std::sync::OnceLock;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook secret
pub const WEBHOOK_TOKEN_HEADER: &str = "X-Gitlab-Token";

/// Per-process key; both sides are MACed before comparing
static COMPARE_KEY: OnceLock<[u8; 32]> = OnceLock::new();

/// Constant-time secret comparison
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let key = COMPARE_KEY.get_or_init(rand::random);

    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(expected.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(provided.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing webhook token")]
    MissingHeader,

    #[error("Invalid webhook token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Middleware rejecting webhook calls without the configured secret.
/// With no secret configured every request passes.
pub async fn require_webhook_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let token = request
            .headers()
            .get(WEBHOOK_TOKEN_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingHeader)?;

        if !secrets_match(token, secret) {
            warn!("Webhook call with invalid token");
            return Err(AuthError::InvalidToken);
        }
    }

    Ok(next.run(request).await)
}
