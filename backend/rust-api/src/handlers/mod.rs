use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

/// Dependency checks plus the judge queue load; 503 when MongoDB or Redis is down
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mongo = check_dependency("MongoDB", Duration::from_secs(1), async {
        state
            .mongo
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    })
    .await;

    let mut conn = state.redis.clone();
    let redis = check_dependency("Redis", Duration::from_millis(500), async {
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    })
    .await;

    let all_healthy = [&mongo, &redis]
        .iter()
        .all(|dep| dep.get("status").and_then(|v| v.as_str()) == Some("healthy"));

    let queue = state.judge.queue().snapshot();
    let judge = json!({
        "status": if queue.waiting >= queue.max_waiting { "saturated" } else { "healthy" },
        "running": queue.running,
        "waiting": queue.waiting,
        "maxConcurrent": queue.max_concurrent,
        "maxWaiting": queue.max_waiting,
    });

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "service": "codejudge-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": {
                "mongodb": mongo,
                "redis": redis,
                "judge": judge,
            }
        })),
    )
}

async fn check_dependency<F>(name: &str, timeout: Duration, check: F) -> serde_json::Value
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => json!({
            "status": "healthy",
            "message": format!("{} connection successful", name),
        }),
        Ok(Err(e)) => json!({
            "status": "unhealthy",
            "error": format!("{} error: {}", name, e),
        }),
        Err(_) => json!({
            "status": "unhealthy",
            "error": format!("{} timeout after {}ms", name, timeout.as_millis()),
        }),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic auth against `METRICS_AUTH` (`user:password`)
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod contests;
pub mod problems;
pub mod submissions;
pub mod ws;
