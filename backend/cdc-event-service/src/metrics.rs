/// Prometheus metrics for CDC event reconciliation
use actix_web::HttpResponse;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

use crate::error::Result;

/// Label value used when recording a canonical event fails
pub const ERROR_LABEL: &str = "error";

/// Per-event outputs of the Operation Emitter
#[derive(Clone)]
pub struct CdcMetrics {
    /// Canonical events emitted (labels: table_name, operation_type)
    pub events_total: IntCounterVec,
    /// Processing time of the message that triggered each event
    pub processing_duration_seconds: HistogramVec,
}

impl CdcMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let events_total = register_int_counter_vec_with_registry!(
            "cdc_events_total",
            "Total number of canonical CDC events emitted",
            &["table_name", "operation_type"],
            registry
        )?;

        // Buckets span in-line handling (~1ms) up to deferred DELETE finalization
        let processing_duration_seconds = register_histogram_vec_with_registry!(
            "cdc_processing_duration_seconds",
            "Time spent processing the message that produced a CDC event",
            &["table_name", "operation_type"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            registry
        )?;

        Ok(Self {
            events_total,
            processing_duration_seconds,
        })
    }

    /// Current count for a (table, operation) pair
    pub fn event_count(&self, table: &str, operation: &str) -> u64 {
        self.events_total
            .with_label_values(&[table, operation])
            .get()
    }
}

/// Health of the transport loop feeding the engine
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Total number of message source errors
    pub consumer_errors_total: IntCounter,
    /// Current consecutive error count (resets on success)
    pub consecutive_errors: IntGauge,
    /// Consumer health status (1 = healthy, 0 = unhealthy)
    pub consumer_healthy: IntGauge,
    /// Current backoff duration in seconds
    pub backoff_seconds: IntGauge,
    /// DELETEs currently awaiting correlation
    pub pending_deletes: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let consumer_errors_total = register_int_counter_with_registry!(
            "cdc_consumer_errors_total",
            "Total number of message source errors encountered",
            registry
        )?;
        let consecutive_errors = register_int_gauge_with_registry!(
            "cdc_consumer_consecutive_errors",
            "Current number of consecutive message source errors",
            registry
        )?;
        let consumer_healthy = register_int_gauge_with_registry!(
            "cdc_consumer_healthy",
            "CDC consumer health status (1 = healthy, 0 = unhealthy)",
            registry
        )?;
        let backoff_seconds = register_int_gauge_with_registry!(
            "cdc_consumer_backoff_seconds",
            "Current backoff duration in seconds",
            registry
        )?;
        let pending_deletes = register_int_gauge_with_registry!(
            "cdc_pending_deletes",
            "Number of DELETE events awaiting a correlated INSERT",
            registry
        )?;

        // Start as healthy
        consumer_healthy.set(1);

        Ok(Self {
            consumer_errors_total,
            consecutive_errors,
            consumer_healthy,
            backoff_seconds,
            pending_deletes,
        })
    }
}

/// Encode a registry in the Prometheus text format
pub fn encode(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// `/metrics` handler over the default registry
pub async fn serve_metrics() -> HttpResponse {
    match encode(prometheus::default_registry()) {
        Ok(body) => HttpResponse::Ok()
            .content_type(TextEncoder::new().format_type())
            .body(body),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
