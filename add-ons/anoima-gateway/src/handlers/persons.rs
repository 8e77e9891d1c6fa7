//! Person routes: random sampling, lookup by key, registration, and the shard-local children.

use super::blocking;
use crate::auth::{actor, require_admin, require_user, require_user_or_admin, ApiError};
use crate::AppState;
use anoima_core::{NewComment, NewInformation, NewPerson, PersonPatch, VoteKind};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RandomQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DetailQuery {
    #[serde(default)]
    fields: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VoteBody {
    #[serde(rename = "type")]
    kind: VoteKind,
}

/// GET /api/persons – admin listing in key issue order.
pub(crate) async fn list_persons(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Result<Response, ApiError> {
    require_admin(actor(&headers, &state.core.config))?;
    let offset = q.offset.unwrap_or(0);
    let limit = q.limit.unwrap_or(state.core.config.list_default_limit);
    let (persons, total) = blocking(&state, move |core| {
        Ok((core.resolver.list(offset, limit)?, core.resolver.count()?))
    })
    .await?;
    Ok(Json(serde_json::json!({
        "persons": persons,
        "total": total,
        "offset": offset,
        "limit": limit,
    }))
    .into_response())
}

/// GET /api/persons/random?limit=N
pub(crate) async fn random_persons(
    State(state): State<AppState>,
    Query(q): Query<RandomQuery>,
) -> Result<Response, ApiError> {
    let limit = state.core.config.random_limit(q.limit);
    let persons = blocking(&state, move |core| core.fanout.random_public(limit)).await?;
    Ok(Json(persons).into_response())
}

/// GET /api/persons/:key – `?fields=all` adds information, comments and votes.
pub(crate) async fn get_person(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<DetailQuery>,
) -> Result<Response, ApiError> {
    if q.fields.as_deref() == Some("all") {
        let detail = blocking(&state, move |core| core.resolver.resolve_detail(&key)).await?;
        Ok(Json(detail).into_response())
    } else {
        let person = blocking(&state, move |core| core.resolver.resolve(&key)).await?;
        Ok(Json(person).into_response())
    }
}

pub(crate) async fn create_person(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewPerson>,
) -> Result<Response, ApiError> {
    let owner = require_user(actor(&headers, &state.core.config))?;
    let person = blocking(&state, move |core| core.resolver.create(body, owner)).await?;
    Ok((StatusCode::CREATED, Json(person)).into_response())
}

pub(crate) async fn update_person(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(patch): Json<PersonPatch>,
) -> Result<Response, ApiError> {
    let caller = require_user_or_admin(actor(&headers, &state.core.config))?;
    let person = blocking(&state, move |core| core.resolver.update(&key, patch, caller)).await?;
    Ok(Json(person).into_response())
}

pub(crate) async fn delete_person(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = require_user_or_admin(actor(&headers, &state.core.config))?;
    blocking(&state, move |core| core.resolver.delete(&key, caller)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn get_information(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, u64)>,
) -> Result<Response, ApiError> {
    let view = blocking(&state, move |core| core.resolver.information(&key, id)).await?;
    Ok(Json(view).into_response())
}

pub(crate) async fn add_information(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<NewInformation>,
) -> Result<Response, ApiError> {
    let owner = require_user(actor(&headers, &state.core.config))?;
    let row = blocking(&state, move |core| {
        core.resolver.add_information(&key, body, owner)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

pub(crate) async fn delete_information(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((key, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let caller = require_user_or_admin(actor(&headers, &state.core.config))?;
    blocking(&state, move |core| {
        core.resolver.delete_information(&key, id, caller)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<NewComment>,
) -> Result<Response, ApiError> {
    let owner = require_user(actor(&headers, &state.core.config))?;
    let row = blocking(&state, move |core| core.resolver.add_comment(&key, body, owner)).await?;
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

pub(crate) async fn add_information_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((key, id)): Path<(String, u64)>,
    Json(body): Json<NewComment>,
) -> Result<Response, ApiError> {
    let owner = require_user(actor(&headers, &state.core.config))?;
    let row = blocking(&state, move |core| {
        core.resolver.add_information_comment(&key, id, body, owner)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

pub(crate) async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((key, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let caller = require_user_or_admin(actor(&headers, &state.core.config))?;
    blocking(&state, move |core| core.resolver.delete_comment(&key, id, caller)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((key, id)): Path<(String, u64)>,
    Json(body): Json<VoteBody>,
) -> Result<Response, ApiError> {
    let owner = require_user(actor(&headers, &state.core.config))?;
    let kind = body.kind;
    let vote = blocking(&state, move |core| {
        core.resolver.cast_vote(&key, id, kind, owner)
    })
    .await?;
    Ok(Json(vote).into_response())
}
