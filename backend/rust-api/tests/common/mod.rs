#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use codejudge_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
};
use http_body_util::BodyExt;
use mongodb::bson::{doc, oid::ObjectId};
use std::sync::Arc;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    dotenvy::from_filename(".env.test").ok();

    let config = Config::load().expect("Failed to load test configuration");

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");
    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    let state = Arc::new(
        AppState::new(config, mongo_client, redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

pub fn token(state: &AppState, user_id: &str, role: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    JwtService::new(&state.config.jwt_secret)
        .generate_token(&JwtClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        })
        .expect("Failed to sign test token")
}

pub fn new_user_id() -> String {
    ObjectId::new().to_hex()
}

/// Inserts a published "sum of two numbers" problem with one hidden case
pub async fn seed_problem(state: &AppState, published: bool) -> ObjectId {
    let id = ObjectId::new();
    state
        .mongo
        .collection::<mongodb::bson::Document>("problems")
        .insert_one(doc! {
            "_id": id,
            "title": format!("Sum {}", id.to_hex()),
            "slug": format!("sum-{}", id.to_hex()),
            "description": "Print a + b",
            "difficulty": "easy",
            "tags": ["math"],
            "testCases": [
                { "input": "1 2", "expectedOutput": "3", "isHidden": false },
                { "input": "10 20", "expectedOutput": "30", "isHidden": true },
            ],
            "constraints": { "timeLimit": 2000, "memoryLimit": 256 },
            "metadata": {
                "isPublished": published,
                "views": 0,
                "submissions": 0,
                "acceptedSubmissions": 0,
                "acceptanceRate": 0.0,
            },
        })
        .await
        .expect("Failed to seed problem");
    id
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
