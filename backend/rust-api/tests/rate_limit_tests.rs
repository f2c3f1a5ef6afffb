mod common;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

async fn clear_rate_limits(app: &common::TestApp) {
    let mut conn = app.state.redis.clone();
    let keys: Vec<String> = redis::cmd("KEYS")
        .arg("ratelimit:*")
        .query_async(&mut conn)
        .await
        .unwrap_or_default();
    if !keys.is_empty() {
        let _: () = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn submission_intake_is_throttled_per_user() {
    std::env::set_var("RATE_LIMIT_SUBMISSIONS", "2");
    let app = common::create_test_app().await;
    clear_rate_limits(&app).await;

    let token = common::token(&app.state, &common::new_user_id(), "user");
    let body = json!({
        "problemId": common::new_user_id(),
        "language": "python",
        "code": "print(1)",
    });

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = app
            .router
            .clone()
            .oneshot(common::json_request(
                "POST",
                "/api/v1/submissions",
                Some(&token),
                body.clone(),
            ))
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::NOT_FOUND,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );

    // another user still has a fresh window
    let other = common::token(&app.state, &common::new_user_id(), "user");
    let response = app
        .router
        .oneshot(common::json_request("POST", "/api/v1/submissions", Some(&other), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reads_are_not_counted_against_the_submission_limit() {
    std::env::set_var("RATE_LIMIT_SUBMISSIONS", "2");
    let app = common::create_test_app().await;
    clear_rate_limits(&app).await;

    let token = common::token(&app.state, &common::new_user_id(), "user");
    for _ in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(common::get_request("/api/v1/submissions/recent", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
