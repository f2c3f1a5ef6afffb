use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, CounterVec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_HIT_RATIO: CounterVec = register_counter_vec!(
        "cache_hit_ratio",
        "Cache hit/miss ratio",
        &["result"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Judge Metrics
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submissions_total",
        "Total number of accepted-for-judging submissions",
        &["language"]
    )
    .unwrap();

    pub static ref JUDGE_VERDICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "judge_verdicts_total",
        "Final verdicts produced by the judge",
        &["verdict"]
    )
    .unwrap();

    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "execution_duration_seconds",
        "Time spent compiling and running one program against its test cases",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    pub static ref EXECUTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "executions_active",
        "Number of programs currently being judged"
    )
    .unwrap();

    pub static ref JUDGE_QUEUE_WAITING: IntGauge = register_int_gauge!(
        "judge_queue_waiting",
        "Number of judging requests waiting for a sandbox slot"
    )
    .unwrap();

    pub static ref JUDGE_QUEUE_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "judge_queue_rejections_total",
        "Judging requests turned away because the queue was full"
    )
    .unwrap();

    pub static ref JUDGE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "judge_failures_total",
        "Judging runs that ended in an internal error",
        &["kind"]
    )
    .unwrap();

    // Contest Metrics
    pub static ref WS_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "ws_connections_active",
        "Number of open contest WebSocket connections"
    )
    .unwrap();

    pub static ref CONTEST_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "contest_events_total",
        "Events broadcast to contest rooms",
        &["event"]
    )
    .unwrap();

    pub static ref CONTEST_SCHEDULER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "contest_scheduler_ticks_total",
        "Contest lifecycle passes by result",
        &["result"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Counts and times one MongoDB call under `operation`/`collection` labels
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Counts and times one Redis call
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

pub fn record_cache_hit() {
    CACHE_HIT_RATIO.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    CACHE_HIT_RATIO.with_label_values(&["miss"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judge_gauges_are_registered() {
        assert!(JUDGE_QUEUE_WAITING.get() >= 0);
        assert!(EXECUTIONS_ACTIVE.get() >= 0);
    }

    #[test]
    fn judge_metrics_are_rendered() {
        JUDGE_VERDICTS_TOTAL
            .with_label_values(&["accepted"])
            .inc();
        SUBMISSIONS_TOTAL.with_label_values(&["python"]).inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("judge_verdicts_total"));
        assert!(output.contains("submissions_total"));
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("http_requests_total"));
    }
}
