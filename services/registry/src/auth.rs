//! HTTP Basic authentication for the OCI routes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secret::Secret;
use serde::Deserialize;

use crate::error::ErrorResponse;

const CHALLENGE: &str = r#"Basic realm="Helm Registry""#;

/// A user allowed to access the registry
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Login name
    pub username: String,
    /// Password, compared in constant time
    pub password: Secret,
}

impl User {
    /// Create a user
    pub fn new(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Who may use the OCI routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// When false every request is let through
    #[serde(default)]
    pub enabled: bool,
    /// Accepted credentials
    #[serde(default)]
    pub users: Vec<User>,
}

impl AuthConfig {
    /// Require one of `users` on every OCI request.
    pub fn basic(users: Vec<User>) -> Self {
        Self {
            enabled: true,
            users,
        }
    }

    /// Whether the credentials match a configured user.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .iter()
            .filter(|user| user.username == username)
            .any(|user| user.password.verify(password))
    }
}

/// Split an `Authorization: Basic ...` header into user and password.
fn credentials(value: &HeaderValue) -> Option<(String, String)> {
    let encoded = value.to_str().ok()?.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, CHALLENGE)],
        axum::Json(ErrorResponse::new("UNAUTHORIZED", "authentication required")),
    )
        .into_response()
}

/// Middleware rejecting requests without valid Basic credentials.
pub(crate) async fn basic_auth(
    State(auth): State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    let Some((username, password)) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(credentials)
    else {
        tracing::debug!("missing basic credentials");
        return unauthorized();
    };

    if !auth.verify(&username, &password) {
        tracing::warn!(%username, "rejected credentials");
        return unauthorized();
    }

    next.run(request).await
}
