//! Metric registration and Prometheus export.
//!
//! The recorder installs once per process; `/metrics` handlers render the
//! returned handle. Series names are constants so relay, client and tests
//! agree on them.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;
use thiserror::Error;

pub const ONION_SIZE: &str = "calyx_onion_size_bytes";
pub const LATENCY_BETWEEN_HOPS: &str = "calyx_hop_latency_ms";
pub const PROCESSING_TIME: &str = "calyx_processing_time_ms";
pub const ONIONS_RECEIVED: &str = "calyx_onions_received_total";
pub const ONIONS_FORWARDED: &str = "calyx_onions_forwarded_total";
pub const ONIONS_DROPPED: &str = "calyx_onions_dropped_total";
pub const CHECKPOINTS_RECEIVED: &str = "calyx_checkpoints_received_total";
pub const MESSAGES_DELIVERED: &str = "calyx_messages_delivered_total";
pub const DELIVERY_LATENCY: &str = "calyx_delivery_latency_ms";
pub const RUN_START_TIMESTAMP: &str = "calyx_run_start_timestamp_ms";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install metrics recorder: {0}")]
    InstallFailed(String),
}

impl From<BuildError> for MetricsError {
    fn from(e: BuildError) -> Self {
        MetricsError::InstallFailed(e.to_string())
    }
}

/// Install the process-wide Prometheus recorder and describe every series.
/// Fails if a recorder is already installed, which is fatal at startup.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_histogram!(ONION_SIZE, "Serialized onion size in bytes");
    describe_histogram!(LATENCY_BETWEEN_HOPS, "Network latency from the previous hop in milliseconds");
    describe_histogram!(PROCESSING_TIME, "Queue-plus-peel time per onion in milliseconds");
    describe_counter!(ONIONS_RECEIVED, "Onions received on /receive");
    describe_counter!(ONIONS_FORWARDED, "Onions forwarded to the next hop");
    describe_counter!(ONIONS_DROPPED, "Onions dropped, labelled by reason");
    describe_counter!(CHECKPOINTS_RECEIVED, "Verified checkpoint nonces, labelled by layer");
    describe_counter!(MESSAGES_DELIVERED, "Payload messages delivered to this client");
    describe_histogram!(DELIVERY_LATENCY, "End-to-end delivery latency in milliseconds");
    describe_gauge!(RUN_START_TIMESTAMP, "Start-of-run timestamp installed by the directory");
}

/// Mark the beginning of a run; Prometheus sees one step per run.
pub fn record_run_start(start_of_run_ms: i64) {
    gauge!(RUN_START_TIMESTAMP).set(start_of_run_ms as f64);
}

pub fn record_onion_received(layer: usize) {
    counter!(ONIONS_RECEIVED, "layer" => layer.to_string()).increment(1);
}

pub fn record_onion_forwarded(layer: usize) {
    counter!(ONIONS_FORWARDED, "layer" => layer.to_string()).increment(1);
}

pub fn record_onion_dropped(reason: &'static str) {
    counter!(ONIONS_DROPPED, "reason" => reason).increment(1);
}

pub fn record_checkpoint(layer: usize) {
    counter!(CHECKPOINTS_RECEIVED, "layer" => layer.to_string()).increment(1);
}

pub fn record_hop_latency(layer: usize, millis: i64) {
    histogram!(LATENCY_BETWEEN_HOPS, "layer" => layer.to_string()).record(millis.max(0) as f64);
}

pub fn record_onion_size(bytes: usize) {
    histogram!(ONION_SIZE).record(bytes as f64);
}

pub fn record_processing_time(millis: f64) {
    histogram!(PROCESSING_TIME).record(millis.max(0.0));
}

pub fn record_delivery(latency_ms: i64) {
    counter!(MESSAGES_DELIVERED).increment(1);
    histogram!(DELIVERY_LATENCY).record(latency_ms.max(0) as f64);
}

/// Timer for per-onion processing spans.
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Timer { name, start: Instant::now() }
    }

    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
