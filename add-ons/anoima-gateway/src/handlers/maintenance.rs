//! Operator endpoints: shard health and the read-only orphan audit.

use super::blocking;
use crate::auth::{actor, require_admin, ApiError};
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

const DEFAULT_ORPHAN_AGE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub(crate) struct OrphanQuery {
    #[serde(default)]
    older_than_secs: Option<i64>,
}

/// GET /api/health – shard connectivity and row counts.
pub(crate) async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    let shards = blocking(&state, |core| Ok(core.shards.status())).await?;
    let all_connected = shards.iter().all(|s| s.connected);
    Ok(Json(serde_json::json!({
        "app_name": state.core.config.app_name,
        "status": if all_connected { "ok" } else { "degraded" },
        "shard_count": shards.len(),
        "shards": shards,
    }))
    .into_response())
}

/// GET /api/maintenance/orphans – key-map entries with no person row in their shard.
pub(crate) async fn orphans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<OrphanQuery>,
) -> Result<Response, ApiError> {
    require_admin(actor(&headers, &state.core.config))?;
    let secs = q.older_than_secs.unwrap_or(DEFAULT_ORPHAN_AGE_SECS).max(0);
    let orphans = blocking(&state, move |core| {
        core.resolver.find_orphans(chrono::Duration::seconds(secs))
    })
    .await?;
    Ok(Json(serde_json::json!({
        "older_than_secs": secs,
        "count": orphans.len(),
        "orphans": orphans,
    }))
    .into_response())
}
