use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::JwtClaims;
use crate::error::ApiError;
use crate::metrics::track_cache_operation;
use crate::services::AppState;

const RATE_LIMIT_PER_USER: u32 = 100; // requests per minute
const RATE_LIMIT_PER_IP: u32 = 200; // requests per minute
const RATE_WINDOW_SECONDS: u64 = 60;

const SUBMISSION_RATE_LIMIT: u32 = 10; // submissions per minute per user
const SUBMISSION_RATE_WINDOW_SECONDS: u64 = 60;

// Fixed window counter: first hit sets the TTL, later hits increment until the limit
const RATE_LIMIT_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

/// Client address: X-Forwarded-For, Forwarded, X-Real-IP, then the socket peer
pub fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // comma separated list; the first hop is the client
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split(';') {
                let p = part.trim();
                if let Some(val) = p.strip_prefix("for=") {
                    return val.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn limit_from_env(key: &str, fallback: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(fallback)
}

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

/// General API limit, per user when authenticated and always per IP
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());
    let user_id = request
        .extensions()
        .get::<JwtClaims>()
        .map(|claims| claims.sub.clone());

    if let Some(uid) = &user_id {
        let limit = limit_from_env("RATE_LIMIT_PER_USER", RATE_LIMIT_PER_USER);
        let key = format!("ratelimit:user:{}", uid);
        if !check_rate_limit(&state.redis, &key, limit, RATE_WINDOW_SECONDS).await? {
            tracing::warn!("Rate limit exceeded for user: {}", uid);
            return Err(ApiError::TooManyRequests(
                "Too many requests, please try again later".to_string(),
            ));
        }
    }

    let limit = limit_from_env("RATE_LIMIT_PER_IP", RATE_LIMIT_PER_IP);
    let key = format!("ratelimit:ip:{}", client_ip);
    if !check_rate_limit(&state.redis, &key, limit, RATE_WINDOW_SECONDS).await? {
        tracing::warn!("Rate limit exceeded for IP: {}", client_ip);
        return Err(ApiError::TooManyRequests(
            "Too many requests, please try again later".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

/// Submission intake limit; must run after the auth middleware
pub async fn submission_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if rate_limit_disabled() {
        return Ok(next.run(request).await);
    }

    let key = match request.extensions().get::<JwtClaims>() {
        Some(claims) => submission_key(&claims.sub),
        None => submission_key(&extract_client_ip_from(request.headers(), request.extensions())),
    };

    let limit = limit_from_env("RATE_LIMIT_SUBMISSIONS", SUBMISSION_RATE_LIMIT);
    if !check_rate_limit(&state.redis, &key, limit, SUBMISSION_RATE_WINDOW_SECONDS).await? {
        tracing::warn!(key = %key, "Submission rate limit exceeded");
        return Err(ApiError::TooManyRequests(
            "Too many submissions, please wait a minute before trying again".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

fn submission_key(subject: &str) -> String {
    format!("ratelimit:submit:{}", subject)
}

/// Returns false once `limit` hits were counted within the window
async fn check_rate_limit(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> anyhow::Result<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = track_cache_operation("rate_limit", async {
        redis::Script::new(RATE_LIMIT_SCRIPT)
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)
    })
    .await?;

    Ok(allowed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_client_ip_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "1.2.3.4");
    }

    #[test]
    fn test_extract_client_ip_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "for=5.6.7.8;proto=http".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "5.6.7.8");
    }

    #[test]
    fn test_extract_client_ip_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "9.9.9.9");
    }

    #[test]
    fn test_extract_client_ip_connectinfo() {
        let headers = HeaderMap::new();
        let mut exts = axum::http::Extensions::new();
        exts.insert(ConnectInfo::<SocketAddr>("7.7.7.7:1234".parse().unwrap()));
        assert_eq!(extract_client_ip_from(&headers, &exts), "7.7.7.7");
    }

    #[test]
    fn submission_keys_are_per_subject() {
        assert_eq!(submission_key("u1"), "ratelimit:submit:u1");
    }
}
