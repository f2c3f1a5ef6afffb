use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::AppJson,
    models::contest::{ContestSchedule, ContestStatusRequest},
    services::{contest_service::ContestService, AppState},
};

/// GET /api/v1/contests/{id}/leaderboard
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let leaderboard = ContestService::from_state(&state)
        .leaderboard(&contest_id)
        .await?;
    Ok(Json(leaderboard))
}

/// POST /api/v1/contests/{id}/status (admin)
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<String>,
    AppJson(req): AppJson<ContestStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let delivered = ContestService::from_state(&state)
        .set_status(&contest_id, req.status)
        .await?;

    Ok(Json(json!({
        "contestId": contest_id,
        "status": req.status,
        "delivered": delivered,
    })))
}

/// PUT /api/v1/contests/{id}/schedule (admin)
pub async fn set_schedule(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<String>,
    AppJson(schedule): AppJson<ContestSchedule>,
) -> Result<impl IntoResponse, ApiError> {
    schedule.check().map_err(ApiError::BadRequest)?;

    let changed = ContestService::from_state(&state)
        .set_schedule(&contest_id, schedule)
        .await?;

    Ok(Json(json!({
        "contestId": contest_id,
        "startTime": schedule.start_time,
        "endTime": schedule.end_time,
        "status": changed,
    })))
}
