mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn health_reports_dependencies() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .oneshot(common::get_request("/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["service"], "codejudge-api");
}

#[tokio::test]
async fn trace_id_is_echoed() {
    let app = common::create_test_app().await;

    let request = Request::builder()
        .uri("/health")
        .header("x-trace-id", "trace-abc")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("x-trace-id").and_then(|v| v.to_str().ok()),
        Some("trace-abc")
    );
}

#[tokio::test]
async fn metrics_require_basic_auth() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .oneshot(common::get_request("/metrics", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn contest_status_is_admin_only() {
    let app = common::create_test_app().await;
    let contest_id = common::new_user_id();
    let uri = format!("/api/v1/contests/{}/status", contest_id);

    let user = common::token(&app.state, &common::new_user_id(), "user");
    let response = app
        .router
        .clone()
        .oneshot(common::json_request("POST", &uri, Some(&user), json!({ "status": "ongoing" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = common::token(&app.state, &common::new_user_id(), "admin");
    let response = app
        .router
        .clone()
        .oneshot(common::json_request("POST", &uri, Some(&admin), json!({ "status": "ongoing" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ongoing");
    assert_eq!(body["delivered"], 0);

    let response = app
        .router
        .oneshot(common::get_request(
            &format!("/api/v1/contests/{}/leaderboard", contest_id),
            Some(&user),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn scheduled_contest_moves_through_its_phases() {
    use chrono::{Duration, Utc};
    use codejudge_api::models::contest::{ContestPhase, ContestServerEvent};
    use codejudge_api::services::contest_service::ContestService;

    let app = common::create_test_app().await;
    let contest_id = common::new_user_id();
    let uri = format!("/api/v1/contests/{}/schedule", contest_id);
    let admin = common::token(&app.state, &common::new_user_id(), "admin");

    let start = Utc::now() - Duration::minutes(1);
    let end = Utc::now() + Duration::hours(1);

    let response = app
        .router
        .clone()
        .oneshot(common::json_request(
            "PUT",
            &uri,
            Some(&admin),
            json!({ "startTime": end, "endTime": start }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .clone()
        .oneshot(common::json_request(
            "PUT",
            &uri,
            Some(&admin),
            json!({ "startTime": start, "endTime": end }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ongoing");

    let mut room = app.state.contests.subscribe(&contest_id);
    let moved = ContestService::from_state(&app.state)
        .advance_scheduled(end + Duration::seconds(1))
        .await
        .unwrap();
    assert!(moved.contains(&(contest_id.clone(), ContestPhase::Ended)));

    match room.try_recv().unwrap() {
        ContestServerEvent::ContestStatus { contest_id: id, status } => {
            assert_eq!(id, contest_id);
            assert_eq!(status, ContestPhase::Ended);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Ended contests leave the schedule
    let moved = ContestService::from_state(&app.state)
        .advance_scheduled(end + Duration::hours(1))
        .await
        .unwrap();
    assert!(moved.iter().all(|(id, _)| id != &contest_id));
}

#[tokio::test]
async fn contest_schedule_is_admin_only() {
    let app = common::create_test_app().await;
    let uri = format!("/api/v1/contests/{}/schedule", common::new_user_id());
    let user = common::token(&app.state, &common::new_user_id(), "user");

    let response = app
        .router
        .oneshot(common::json_request(
            "PUT",
            &uri,
            Some(&user),
            json!({ "startTime": "2026-10-16T10:00:00Z", "endTime": "2026-10-16T12:00:00Z" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
