use axum::{
    extract::{Path, Query, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::{auth::JwtClaims, rate_limit::extract_client_ip_from},
    models::{
        execution::RunRequest,
        submission::{LimitQuery, ProblemSubmissionsQuery, SubmissionListQuery, SubmitRequest},
    },
    services::{
        execution_service::ExecutionService,
        submission_service::{ClientInfo, SubmissionService},
        AppState,
    },
};

/// POST /api/v1/submissions
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    headers: HeaderMap,
    extensions: Extensions,
    AppJson(req): AppJson<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = ClientInfo {
        ip_address: Some(extract_client_ip_from(&headers, &extensions)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let service = SubmissionService::new(&state);
    let response = service.submit(&claims.sub, req, client).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/submissions
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<SubmissionListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let response = SubmissionService::new(&state).list(&claims.sub, query).await?;
    Ok(Json(response))
}

/// GET /api/v1/submissions/recent
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let response = SubmissionService::new(&state).recent(&claims.sub, query).await?;
    Ok(Json(response))
}

/// GET /api/v1/submissions/user/solved
pub async fn solved(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let response = SubmissionService::new(&state).solved(&claims.sub).await?;
    Ok(Json(response))
}

/// GET /api/v1/submissions/problem/{problem_id}
pub async fn problem_submissions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(problem_id): Path<String>,
    Query(query): Query<ProblemSubmissionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let response = SubmissionService::new(&state)
        .problem_submissions(&claims.sub, &problem_id, query)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/submissions/{id}
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let submission = SubmissionService::new(&state)
        .get(&id, &claims.sub, claims.is_admin())
        .await?;
    Ok(Json(submission))
}

/// GET /api/v1/submissions/{id}/status
pub async fn submission_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = SubmissionService::new(&state)
        .status(&id, &claims.sub, claims.is_admin())
        .await?;
    Ok(Json(status))
}

/// POST /api/v1/submissions/run
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!(user_id = %claims.sub, language = %req.language, "Running code");
    let response = ExecutionService::new(&state).run(req).await?;
    Ok(Json(response))
}

/// POST /api/v1/submissions/test
pub async fn start_test_run(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let accepted = ExecutionService::new(&state)
        .start_batch(&claims.sub, req)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/v1/submissions/execution/{id}
pub async fn execution_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(execution_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = ExecutionService::new(&state)
        .get(&execution_id, &claims.sub, claims.is_admin())
        .await?;
    Ok(Json(job))
}
