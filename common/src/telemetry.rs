// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "medication-reminder-scheduler";

/// Initialize structured logging with JSON formatting and trace context
///
/// `RUST_LOG` takes precedence over the configured level. When a tracing
/// endpoint is given, spans are also exported over OTLP.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the reminder metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "reminder_notifications_sent_total",
        "Advance reminders and escalations delivered"
    );
    describe_counter!(
        "reminder_notifications_skipped_total",
        "Due reminders not sent because a precondition was not met"
    );
    describe_counter!(
        "reminder_dispatch_failed_total",
        "Push deliveries that failed, by reason"
    );
    describe_counter!(
        "escalations_resolved_total",
        "Escalation markers closed, by outcome"
    );
    describe_counter!(
        "push_subscriptions_removed_total",
        "Subscriptions cleared after a permanent push failure"
    );
    describe_counter!(
        "notification_logs_purged_total",
        "Notification log rows removed by retention"
    );
    describe_histogram!(
        "scheduler_task_duration_seconds",
        "Duration of periodic task runs in seconds"
    );
    describe_gauge!(
        "escalation_pending_markers",
        "Escalation markers awaiting evaluation at the last check"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_notification_sent(kind: &str) {
    counter!("reminder_notifications_sent_total", "type" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_notification_skipped(reason: &str) {
    counter!("reminder_notifications_skipped_total", "reason" => reason.to_string()).increment(1);
}

#[inline]
pub fn record_dispatch_failure(reason: &str) {
    counter!("reminder_dispatch_failed_total", "reason" => reason.to_string()).increment(1);
}

#[inline]
pub fn record_escalation_resolved(via: &str) {
    counter!("escalations_resolved_total", "via" => via.to_string()).increment(1);
}

#[inline]
pub fn record_subscription_removed() {
    counter!("push_subscriptions_removed_total").increment(1);
}

#[inline]
pub fn record_logs_purged(count: u64) {
    counter!("notification_logs_purged_total").increment(count);
}

#[inline]
pub fn record_task_duration(task: &str, duration_seconds: f64) {
    histogram!("scheduler_task_duration_seconds", "task" => task.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn update_pending_escalations(count: usize) {
    gauge!("escalation_pending_markers").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent_per_process() {
        // The global subscriber can only be set once; the second call errors
        let first = init_logging("info", None);
        let second = init_logging("debug", None);
        assert!(first.is_ok() || second.is_err());
    }

    #[test]
    fn test_metrics_recording_without_exporter() {
        record_notification_sent("advance");
        record_notification_skipped("quiet_hours");
        record_dispatch_failure("transient");
        record_escalation_resolved("dose_logged");
        record_subscription_removed();
        record_logs_purged(3);
        record_task_duration("medication_reminders", 0.25);
        update_pending_escalations(2);
    }
}
