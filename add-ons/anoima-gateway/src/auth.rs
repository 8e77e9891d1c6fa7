//! Caller identity and the JSON error envelope.
//!
//! Sessions and passwords live in front of the gateway. It only reads the outcome:
//! `X-Anoima-User: <id>` for a signed-in user and `X-API-Key` for an administrator.

use anoima_core::{Actor, AnoimaConfig, AnoimaError};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub(crate) const USER_HEADER: &str = "X-Anoima-User";
pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

/// Errors returned by handlers. Serialized as `{ "error": message }`.
#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Core(AnoimaError),
    /// A blocking core task panicked or was cancelled.
    Internal(String),
}

impl From<AnoimaError> for ApiError {
    fn from(e: AnoimaError) -> Self {
        Self::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            Self::Internal(msg) => {
                tracing::error!(target: "anoima::gateway", error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            Self::Core(e) => {
                let status = match &e {
                    AnoimaError::NotFound(_) => StatusCode::NOT_FOUND,
                    AnoimaError::Validation(_) => StatusCode::BAD_REQUEST,
                    AnoimaError::Forbidden(_) => StatusCode::FORBIDDEN,
                    AnoimaError::UniqueViolation { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(target: "anoima::gateway", error = %e, "request failed");
                }
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Admin when `X-API-Key` matches the configured key, user when `X-Anoima-User` holds an id.
pub(crate) fn actor(headers: &HeaderMap, config: &AnoimaConfig) -> Actor {
    let user_id = header(headers, USER_HEADER).and_then(|s| s.parse::<u64>().ok());
    let admin_key = config
        .admin_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let is_admin = match (admin_key, header(headers, API_KEY_HEADER)) {
        (Some(expected), Some(provided)) => expected == provided,
        _ => false,
    };

    match (is_admin, user_id) {
        (true, id) => Actor::Admin(id),
        (false, Some(id)) => Actor::User(id),
        (false, None) => Actor::Anonymous,
    }
}

/// Signed-in user id, or 401. An admin key without a user header carries no user id.
pub(crate) fn require_user(actor: Actor) -> Result<u64, ApiError> {
    actor
        .user_id()
        .ok_or(ApiError::Unauthorized("missing or invalid X-Anoima-User"))
}

/// A signed-in user or an admin; ownership is checked by the core.
pub(crate) fn require_user_or_admin(actor: Actor) -> Result<Actor, ApiError> {
    if actor.is_admin() {
        Ok(actor)
    } else {
        require_user(actor).map(|_| actor)
    }
}

pub(crate) fn require_admin(actor: Actor) -> Result<(), ApiError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("missing or invalid X-API-Key"))
    }
}
