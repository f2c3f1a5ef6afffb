use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::AllowOrigin, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod judge;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .route("/ws/contests", get(handlers::ws::contest_socket))
        .nest("/api/v1/submissions", submission_routes(app_state.clone()))
        .nest("/api/v1/problems", problem_routes(app_state.clone()))
        .nest("/api/v1/contests", contest_routes(app_state.clone()))
        .with_state(app_state.clone())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(app_state.config.cors_origin.as_deref()))
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(allow_origin)
}

fn submission_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Intake has its own per-user limit on top of the general one
    let intake = Router::new()
        .route("/", post(handlers::submissions::submit))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::submission_rate_limit_middleware,
        ));

    Router::new()
        .route("/", get(handlers::submissions::list))
        .route("/recent", get(handlers::submissions::recent))
        .route("/user/solved", get(handlers::submissions::solved))
        .route(
            "/problem/{problem_id}",
            get(handlers::submissions::problem_submissions),
        )
        .route("/run", post(handlers::submissions::run_code))
        .route("/test", post(handlers::submissions::start_test_run))
        .route(
            "/execution/{id}",
            get(handlers::submissions::execution_status),
        )
        .route("/{id}", get(handlers::submissions::get_submission))
        .route("/{id}/status", get(handlers::submissions::submission_status))
        .merge(intake)
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}

fn problem_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/{id}", get(handlers::problems::get_problem))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::optional_auth_middleware,
        ));

    let admin = Router::new()
        .route("/", post(handlers::problems::create_problem))
        .route("/test-run", post(handlers::problems::test_run))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public.merge(admin)
}

fn contest_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin = Router::new()
        .route("/{id}/status", post(handlers::contests::set_status))
        .route("/{id}/schedule", put(handlers::contests::set_schedule))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ));

    Router::new()
        .route("/{id}/leaderboard", get(handlers::contests::leaderboard))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
