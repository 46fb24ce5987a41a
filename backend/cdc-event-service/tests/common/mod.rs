#![allow(dead_code)]

use cdc_event_service::config::ReconcilerConfig;
use cdc_event_service::metrics::CdcMetrics;
use cdc_event_service::services::cdc::{CanonicalEvent, CdcOperation, RawMessage};
use cdc_event_service::services::{MemoryLogSink, OperationEmitter, ReconciliationEngine};
use prometheus::Registry;
use std::sync::Arc;
use tokio::time::Instant;

pub struct Fixture {
    pub engine: ReconciliationEngine,
    pub sink: MemoryLogSink,
    pub metrics: CdcMetrics,
}

pub fn emitter() -> (OperationEmitter, MemoryLogSink, CdcMetrics) {
    let registry = Registry::new();
    let metrics = CdcMetrics::new(&registry).unwrap();
    let sink = MemoryLogSink::new();
    let emitter = OperationEmitter::new(metrics.clone(), Arc::new(sink.clone()));
    (emitter, sink, metrics)
}

pub fn fixture(config: &ReconcilerConfig, base: Instant) -> Fixture {
    let (emitter, sink, metrics) = emitter();
    Fixture {
        engine: ReconciliationEngine::new_at(config, emitter, base),
        sink,
        metrics,
    }
}

pub fn message(key: Option<&str>, value: &str, offset: i64) -> RawMessage {
    RawMessage::new(key.map(|k| k.as_bytes().to_vec()), value, 0, offset)
}

pub fn count(events: &[CanonicalEvent], operation: CdcOperation) -> usize {
    events.iter().filter(|e| e.operation == operation).count()
}
