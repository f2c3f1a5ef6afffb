use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{parse_object_id, ApiError},
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{execution::RunRequest, problem::CreateProblemRequest, ProblemView},
    services::{execution_service::ExecutionService, problem_service::ProblemService, AppState},
};

/// GET /api/v1/problems/{id}
///
/// Public view without hidden test cases. Unpublished problems are only
/// visible to admins.
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_object_id(&id, "problem id")?;
    let service = ProblemService::new(&state.mongo);

    let is_admin = claims.is_some_and(|Extension(c)| c.is_admin());
    let problem = if is_admin {
        service.get(&id).await?
    } else {
        service.get_published(&id).await?
    };

    let problem = problem.ok_or_else(|| ApiError::not_found("Problem not found"))?;
    Ok(Json(ProblemView::from_problem(&problem)))
}

/// POST /api/v1/problems (admin)
pub async fn create_problem(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateProblemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    tracing::info!(admin_id = %claims.sub, title = %req.title, "Creating problem");

    let problem = ProblemService::new(&state.mongo).create(req).await?;
    Ok((StatusCode::CREATED, Json(ProblemView::from_problem(&problem))))
}

/// POST /api/v1/problems/test-run (admin)
///
/// Runs code synchronously against the supplied cases, or every case of
/// `problemId` including hidden ones, with nothing redacted.
pub async fn test_run(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = ExecutionService::new(&state).test_run(req).await?;
    Ok(Json(response))
}
