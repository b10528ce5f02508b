//! HTTP basic authentication
//!
//! Active only when `SECURITY_USERNAME`/`SECURITY_PASSWORD` are configured.
//! Applies to every route, including the event and video streams.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;

use crate::error::Error;
use crate::state::{AppState, BasicCredentials};

pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.auth.as_ref() else {
        return next.run(request).await;
    };

    match credentials_from(request.headers()) {
        Some(given) if credentials_match(&given, expected) => next.run(request).await,
        Some(given) => {
            tracing::warn!(
                username = %given.username,
                path = %request.uri().path(),
                "Rejected login"
            );
            Error::Unauthorized("invalid credentials".to_string()).into_response()
        }
        None => Error::Unauthorized("credentials required".to_string()).into_response(),
    }
}

/// Decode an `Authorization: Basic ...` header
fn credentials_from(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Compare without short-circuiting on the first differing byte
fn credentials_match(given: &BasicCredentials, expected: &BasicCredentials) -> bool {
    let user_ok = constant_time_eq(given.username.as_bytes(), expected.username.as_bytes());
    let pass_ok = constant_time_eq(given.password.as_bytes(), expected.password.as_bytes());
    user_ok & pass_ok
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
