// =============================================================================
// Bearer Token Authentication: Axum extractor
// =============================================================================
//
// Extracts and validates a Bearer token from the `Authorization` header.
// The expected token is read from the `ENGINE_ADMIN_TOKEN` environment
// variable on every request.  Comparison is performed in constant time.
//
// Usage as an Axum extractor:
//
//   async fn handler(AuthBearer(token): AuthBearer, ...) { ... }
//
// If the token is missing or invalid, the extractor short-circuits the request
// with a 403 Forbidden response before the handler body executes.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Environment variable holding the operator token.
pub const ADMIN_TOKEN_ENV: &str = "ENGINE_ADMIN_TOKEN";

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time for equal lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// Extractor
// =============================================================================

/// Validated `Authorization: Bearer <token>` header.
pub struct AuthBearer(pub String);

/// Rejection type returned when authentication fails.
#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

/// Check an `Authorization` header value against `expected`.
fn check_bearer(header: Option<&str>, expected: &str) -> Result<String, AuthRejection> {
    if expected.is_empty() {
        warn!("{ADMIN_TOKEN_ENV} is not set, all authenticated requests will be rejected");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Server authentication not configured",
        });
    }

    let Some(token) = header.and_then(|v| v.strip_prefix("Bearer ")) else {
        warn!("missing or malformed Authorization header");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Missing or invalid authorization token",
        });
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        warn!("invalid admin token presented");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token",
        });
    }

    Ok(token.to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = std::env::var(ADMIN_TOKEN_ENV).unwrap_or_default();
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        check_bearer(header, &expected).map(AuthBearer)
    }
}

// =============================================================================
// Tests
// =============================================================================
