//! Prometheus metrics.
//!
//! Counters and histograms are recorded through the `metrics` facade;
//! the exporter renders them at `GET /metrics`.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global recorder. Call once at startup.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder")
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "endpoint" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => path.to_string(),
    )
    .record(duration_secs);
}

pub fn record_command(intent: &str, status: &str, duration_secs: f64) {
    counter!(
        "commands_processed_total",
        "intent" => intent.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "command_processing_duration_seconds",
        "intent" => intent.to_string(),
    )
    .record(duration_secs);
}

pub fn record_search(category: &str, status: &str, duration_secs: f64) {
    counter!(
        "web_searches_total",
        "category" => category.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "web_search_duration_seconds",
        "category" => category.to_string(),
    )
    .record(duration_secs);
}

pub fn record_habr_search(status: &str, duration_secs: f64) {
    counter!("habr_searches_total", "status" => status.to_string()).increment(1);
    histogram!("habr_search_duration_seconds").record(duration_secs);
}

pub fn record_telegram_message(status: &str) {
    counter!("telegram_messages_sent_total", "status" => status.to_string()).increment(1);
}

pub fn record_ws_message(direction: &str, message_type: &str) {
    counter!(
        "websocket_messages_total",
        "direction" => direction.to_string(),
        "type" => message_type.to_string(),
    )
    .increment(1);
}

pub fn set_ws_connections(count: usize) {
    gauge!("active_websocket_connections").set(count as f64);
}

pub fn set_system_health(healthy: bool) {
    gauge!("system_health").set(if healthy { 1.0 } else { 0.0 });
}

pub fn set_database_health(healthy: bool) {
    gauge!("database_health").set(if healthy { 1.0 } else { 0.0 });
}
