use std::sync::OnceLock;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const SECONDS_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), SECONDS_BUCKETS)?
        .install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("http_requests_total", "HTTP responses by status");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    metrics::describe_counter!("booklets_generated_total", "Booklets baked, by variant");
    metrics::describe_counter!("generation_units_total", "Generation units, by outcome");
    metrics::describe_counter!("scans_processed_total", "Answer sheet scans, by outcome");
    metrics::describe_counter!("scans_queued_total", "Scans stored for the worker");
    metrics::describe_counter!("scan_jobs_recovered_total", "Stale scan jobs put back or failed");
    metrics::describe_histogram!(
        "scan_recognition_seconds",
        metrics::Unit::Seconds,
        "Time spent recognizing one sheet"
    );
    metrics::describe_counter!("spreadsheet_rows_total", "Spreadsheet rows, by outcome");
}
