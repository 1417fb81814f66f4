// Telemetry module for structured logging and metrics
//
// Metric helpers are cheap no-ops until a recorder is installed.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` overrides `log_level` when set. JSON output carries the span
/// list so `trigger_id`, `job_identity` and `listener_id` fields appear on
/// every event emitted inside an instrumented call.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Install the Prometheus exporter and describe the pipeline metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("triggers_fired_total", "Trigger occurrences handed to the dispatcher");
    describe_counter!(
        "trigger_occurrences_skipped_total",
        "Occurrences skipped because the previous firing was still in flight"
    );
    describe_counter!("triggers_rejected_total", "Trigger definitions rejected at load");
    describe_counter!(
        "dispatch_messages_published_total",
        "Dispatch messages accepted by the queue"
    );
    describe_counter!("dispatch_failures_total", "Dispatch messages the queue refused");
    describe_counter!(
        "dispatch_messages_discarded_total",
        "Received messages discarded as malformed or unresolved"
    );
    describe_counter!("job_success_total", "Total number of successful job runs");
    describe_counter!("job_failed_total", "Total number of failed job runs");
    describe_histogram!("job_duration_seconds", "Duration of job runs in seconds");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_trigger_fired(trigger_id: &str, job_identity: &str) {
    counter!(
        "triggers_fired_total",
        "trigger_id" => trigger_id.to_string(),
        "job_identity" => job_identity.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_occurrence_skipped(trigger_id: &str) {
    counter!("trigger_occurrences_skipped_total", "trigger_id" => trigger_id.to_string())
        .increment(1);
}

#[inline]
pub fn record_trigger_rejected() {
    counter!("triggers_rejected_total").increment(1);
}

#[inline]
pub fn record_dispatch_published(job_identity: &str) {
    counter!("dispatch_messages_published_total", "job_identity" => job_identity.to_string())
        .increment(1);
}

#[inline]
pub fn record_dispatch_failure(job_identity: &str) {
    counter!("dispatch_failures_total", "job_identity" => job_identity.to_string()).increment(1);
}

/// `reason` is "malformed" or "unresolved"
#[inline]
pub fn record_message_discarded(reason: &'static str) {
    counter!("dispatch_messages_discarded_total", "reason" => reason).increment(1);
}

#[inline]
pub fn record_job_success(job_identity: &str) {
    counter!("job_success_total", "job_identity" => job_identity.to_string()).increment(1);
}

#[inline]
pub fn record_job_failure(job_identity: &str, reason: &'static str) {
    counter!(
        "job_failed_total",
        "job_identity" => job_identity.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_job_duration(job_identity: &str, duration_seconds: f64) {
    histogram!("job_duration_seconds", "job_identity" => job_identity.to_string())
        .record(duration_seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_fails() {
        // Whichever call comes first wins; the global subscriber is set once
        let _ = init_logging("info", false);
        assert!(init_logging("debug", true).is_err());
    }

    #[test]
    fn test_metrics_recording_without_recorder() {
        record_trigger_fired("nightly", "DigestJob");
        record_occurrence_skipped("nightly");
        record_trigger_rejected();
        record_dispatch_published("DigestJob");
        record_dispatch_failure("DigestJob");
        record_message_discarded("unresolved");
        record_job_success("DigestJob");
        record_job_failure("DigestJob", "error");
        record_job_duration("DigestJob", 0.25);
    }
}
