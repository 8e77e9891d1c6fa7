use super::blocking;
use crate::auth::{actor, require_user, ApiError};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// POST /api/persons/:key/bookmark
pub(crate) async fn add_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let user = require_user(actor(&headers, &state.core.config))?;
    let bookmark = blocking(&state, move |core| core.bookmarks.add(user, &key)).await?;
    Ok(Json(bookmark).into_response())
}

/// DELETE /api/persons/:key/bookmark
pub(crate) async fn remove_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(actor(&headers, &state.core.config))?;
    blocking(&state, move |core| core.bookmarks.remove(user, &key)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/bookmarks
pub(crate) async fn list_bookmarks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = require_user(actor(&headers, &state.core.config))?;
    let bookmarks = blocking(&state, move |core| core.bookmarks.list(user)).await?;
    Ok(Json(bookmarks).into_response())
}
