//! Axum route handlers for the Analysis API.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::admission::{
    get_analysis, list_analyses, start_or_reuse, validate_start_request,
};
use crate::errors::AppError;
use crate::models::analysis::AnalysisProjection;
use crate::state::AppState;

const RETRY_HEADER: &str = "x-retry-analysis";

/// Caller identity, taken from the identity middleware's header. Guest
/// identities arrive through the same header and behave like normal users.
pub struct UserId(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeRequest {
    pub job_description: Option<String>,
    pub prompt_version: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    pub retry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListAnalysesResponse {
    pub analyses: Vec<AnalysisProjection>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /documents/:id/analyze
///
/// Starts an analysis for the document, or returns the existing record for
/// the `(user, document)` pair. 202 while work is pending, 200 when a
/// terminal record is reused.
pub async fn handle_analyze(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(document_id): Path<Uuid>,
    Query(query): Query<AnalyzeQuery>,
    headers: HeaderMap,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<(StatusCode, Json<AnalysisProjection>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let allow_retry = query
        .retry
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || headers
            .get(RETRY_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let params = validate_start_request(
        &user_id,
        document_id,
        request.job_description.as_deref(),
        request.prompt_version.as_deref(),
        request.mode.as_deref(),
        allow_retry,
        state.config.min_job_description_runes,
        state.config.max_job_description_runes,
    )
    .map_err(AppError::FieldValidation)?;

    let (row, _created) = start_or_reuse(&state, params).await?;

    let status = if row.status().is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(AnalysisProjection::from(&row))))
}

/// GET /analyses/:id
///
/// Polls one analysis. Non-terminal records carry `pollAfterMs`; polls
/// faster than the configured window get a 429 with a retry hint.
pub async fn handle_get_analysis(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(analysis_id): Path<Uuid>,
) -> Result<Json<AnalysisProjection>, AppError> {
    let row = get_analysis(&state, &user_id, analysis_id).await?;
    Ok(Json(AnalysisProjection::from(&row)))
}

/// GET /analyses
///
/// Lists the caller's analyses, newest first. `limit` is clamped server
/// side.
pub async fn handle_list_analyses(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListAnalysesResponse>, AppError> {
    let rows = list_analyses(&state, &user_id, query.limit, query.offset).await?;
    Ok(Json(ListAnalysesResponse {
        analyses: rows.iter().map(AnalysisProjection::from).collect(),
    }))
}
