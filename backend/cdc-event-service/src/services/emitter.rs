use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::{CdcMetrics, ERROR_LABEL};
use crate::services::cdc::CanonicalEvent;
use crate::services::log_sink::{EventLogRecord, LogSink};

/// Records terminal canonical events: counter, log record, duration.
///
/// Never fails outward; sink errors are logged and counted under the
/// `error` operation label.
#[derive(Clone)]
pub struct OperationEmitter {
    metrics: CdcMetrics,
    sink: Arc<dyn LogSink>,
}

impl OperationEmitter {
    pub fn new(metrics: CdcMetrics, sink: Arc<dyn LogSink>) -> Self {
        Self { metrics, sink }
    }

    /// Returns false when the log record could not be written
    pub fn emit(&self, event: &CanonicalEvent, elapsed: Duration) -> bool {
        let table = event.table.as_str();
        let operation = event.operation.label();

        self.metrics
            .events_total
            .with_label_values(&[table, operation.as_str()])
            .inc();

        let recorded = match self.sink.append(&EventLogRecord::new(event)) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    table = %table,
                    operation = %operation,
                    partition = event.partition,
                    offset = event.offset,
                    "Failed to write CDC event record: {}",
                    e
                );
                self.metrics
                    .events_total
                    .with_label_values(&[table, ERROR_LABEL])
                    .inc();
                false
            }
        };

        self.metrics
            .processing_duration_seconds
            .with_label_values(&[table, operation.as_str()])
            .observe(elapsed.as_secs_f64());

        debug!(
            table = %table,
            operation = %operation,
            protocol = event.protocol.as_str(),
            record_id = ?event.record_id,
            "Emitted CDC event"
        );

        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CdcError, Result};
    use crate::services::cdc::{CdcOperation, Protocol};
    use crate::services::log_sink::MemoryLogSink;
    use prometheus::Registry;

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn append(&self, _record: &EventLogRecord) -> Result<()> {
            Err(CdcError::Sink(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sink closed",
            )))
        }
    }

    #[test]
    fn test_emit_counts_and_logs() {
        let registry = Registry::new();
        let metrics = CdcMetrics::new(&registry).unwrap();
        let sink = MemoryLogSink::new();
        let emitter = OperationEmitter::new(metrics.clone(), Arc::new(sink.clone()));

        let event = CanonicalEvent::new("users", CdcOperation::ParseError, Protocol::Invalid);
        assert!(emitter.emit(&event, Duration::from_millis(3)));

        assert_eq!(metrics.event_count("users", "parse_error"), 1);
        assert_eq!(sink.len(), 1);
        let samples = metrics
            .processing_duration_seconds
            .with_label_values(&["users", "parse_error"])
            .get_sample_count();
        assert_eq!(samples, 1);
    }

    #[test]
    fn test_sink_failure_is_contained() {
        let registry = Registry::new();
        let metrics = CdcMetrics::new(&registry).unwrap();
        let emitter = OperationEmitter::new(metrics.clone(), Arc::new(BrokenSink));

        let event = CanonicalEvent::new("orders", CdcOperation::Insert, Protocol::Simple);
        assert!(!emitter.emit(&event, Duration::ZERO));

        assert_eq!(metrics.event_count("orders", "insert"), 1);
        assert_eq!(metrics.event_count("orders", ERROR_LABEL), 1);
    }
}
