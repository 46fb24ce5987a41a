use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::detector::{detect, Detected};
use super::models::{CanonicalEvent, RawMessage};
use super::normalizer::{
    CanalArrayNormalizer, NormalizeContext, Normalizer, SimpleProtocolNormalizer,
    SplitUpdateNormalizer,
};
use super::scheduler::{Scheduler, TaskKind};
use crate::config::ReconcilerConfig;
use crate::services::emitter::OperationEmitter;

/// Turns raw CDC messages into canonical events.
///
/// Single-owner: message handling and deferred tasks both run through
/// `&mut self`, so a finalize task can never interleave with an in-flight
/// message. Callers drive deferred work with [`run_due_tasks`] using
/// [`next_deadline`] to know when.
///
/// [`run_due_tasks`]: ReconciliationEngine::run_due_tasks
/// [`next_deadline`]: ReconciliationEngine::next_deadline
pub struct ReconciliationEngine {
    simple: SimpleProtocolNormalizer,
    canal: CanalArrayNormalizer,
    split_update: SplitUpdateNormalizer,
    scheduler: Scheduler,
    emitter: OperationEmitter,
    sweep_interval: Duration,
}

impl ReconciliationEngine {
    pub fn new(config: &ReconcilerConfig, emitter: OperationEmitter) -> Self {
        Self::new_at(config, emitter, Instant::now())
    }

    /// Create an engine whose first sweep is due one interval after `now`
    pub fn new_at(config: &ReconcilerConfig, emitter: OperationEmitter, now: Instant) -> Self {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(now, config.sweep_interval(), TaskKind::Sweep);

        info!(
            correlation_window_ms = config.correlation_window_ms,
            sweep_interval_secs = config.sweep_interval_secs,
            stale_threshold_secs = config.stale_threshold_secs,
            email_update_heuristic = config.email_update_heuristic,
            "Reconciliation engine initialized"
        );

        Self {
            simple: SimpleProtocolNormalizer::new(config.email_update_heuristic),
            canal: CanalArrayNormalizer::new(config.email_update_heuristic),
            split_update: SplitUpdateNormalizer::new(
                config.correlation_window(),
                config.stale_threshold(),
            ),
            scheduler,
            emitter,
            sweep_interval: config.sweep_interval(),
        }
    }

    pub fn handle_message(&mut self, message: RawMessage) -> Vec<CanonicalEvent> {
        self.handle_message_at(message, Instant::now())
    }

    /// Process one message and emit whatever it settles immediately.
    ///
    /// Never fails: malformed input becomes a PARSE_ERROR event.
    pub fn handle_message_at(&mut self, message: RawMessage, now: Instant) -> Vec<CanonicalEvent> {
        let started = std::time::Instant::now();

        let (normalizer, envelope): (&mut dyn Normalizer, _) = match detect(&message) {
            Detected::Terminal(event) => {
                if event.operation.is_control() {
                    debug!(
                        operation = %event.operation,
                        partition = message.partition,
                        offset = message.offset,
                        "Control message"
                    );
                } else {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "Unparseable CDC message"
                    );
                }
                let events = vec![event];
                self.emit_all(&events, started.elapsed());
                return events;
            }
            Detected::Simple(envelope) => (&mut self.simple as &mut dyn Normalizer, envelope),
            Detected::CanalArray(envelope) => (&mut self.canal as &mut dyn Normalizer, envelope),
            Detected::SplitUpdate(envelope) => {
                (&mut self.split_update as &mut dyn Normalizer, envelope)
            }
        };

        let protocol = normalizer.protocol();
        let mut ctx = NormalizeContext {
            now,
            scheduler: &mut self.scheduler,
        };
        let events = normalizer.normalize(envelope, &mut ctx);

        debug!(
            protocol = protocol.as_str(),
            partition = message.partition,
            offset = message.offset,
            events = events.len(),
            "Handled CDC message"
        );

        self.emit_all(&events, started.elapsed());
        events
    }

    /// Run every task due at `now`; returns the events they emitted
    pub fn run_due_tasks(&mut self, now: Instant) -> Vec<CanonicalEvent> {
        let mut emitted = Vec::new();

        for task in self.scheduler.poll_due(now) {
            match task.kind {
                TaskKind::FinalizeDelete { key, commit_ts } => {
                    if let Some(finalized) = self.split_update.finalize(&key, &commit_ts) {
                        let elapsed = now.saturating_duration_since(finalized.captured_at);
                        self.emitter.emit(&finalized.event, elapsed);
                        emitted.push(finalized.event);
                    }
                }
                TaskKind::Sweep => {
                    let removed = self.split_update.sweep(now, &mut self.scheduler);
                    if removed > 0 {
                        debug!(removed, "Sweep pass finished");
                    }
                    self.scheduler
                        .schedule_after(now, self.sweep_interval, TaskKind::Sweep);
                }
            }
        }

        emitted
    }

    /// Earliest deadline among live tasks
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn pending_len(&self) -> usize {
        self.split_update.pending_len()
    }

    /// Cancel all timers and drop in-flight correlation state.
    ///
    /// Pending deletes are discarded without being emitted.
    pub fn shutdown(&mut self) {
        let dropped = self.split_update.pending_len();
        self.scheduler.clear();
        self.split_update.clear();
        info!(dropped_pending_deletes = dropped, "Reconciliation engine stopped");
    }

    fn emit_all(&self, events: &[CanonicalEvent], elapsed: Duration) {
        for event in events {
            self.emitter.emit(event, elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CdcMetrics;
    use crate::services::cdc::models::CdcOperation;
    use crate::services::log_sink::MemoryLogSink;
    use prometheus::Registry;
    use std::sync::Arc;

    fn engine(base: Instant) -> (ReconciliationEngine, MemoryLogSink, CdcMetrics) {
        let registry = Registry::new();
        let metrics = CdcMetrics::new(&registry).unwrap();
        let sink = MemoryLogSink::new();
        let emitter = OperationEmitter::new(metrics.clone(), Arc::new(sink.clone()));
        let engine = ReconciliationEngine::new_at(&ReconcilerConfig::default(), emitter, base);
        (engine, sink, metrics)
    }

    fn msg(value: &str, offset: i64) -> RawMessage {
        RawMessage::new(None, value, 0, offset)
    }

    #[test]
    fn test_first_sweep_is_scheduled() {
        let base = Instant::now();
        let (mut engine, _, _) = engine(base);
        assert_eq!(engine.next_deadline(), Some(base + Duration::from_secs(30)));
    }

    #[test]
    fn test_terminal_events_are_emitted() {
        let base = Instant::now();
        let (mut engine, sink, metrics) = engine(base);

        let events = engine.handle_message_at(msg("not json", 1), base);
        assert_eq!(events[0].operation, CdcOperation::ParseError);

        engine.handle_message_at(msg(r#"{"type":"WATERMARK","data":{"pos":3}}"#, 2), base);

        assert_eq!(sink.len(), 2);
        assert_eq!(metrics.event_count("unknown", "parse_error"), 1);
    }

    #[test]
    fn test_finalize_emits_with_window_duration() {
        let base = Instant::now();
        let (mut engine, sink, metrics) = engine(base);

        let delete = r#"{"table":"users","type":"DELETE","commitTs":1,"old":{"id":7}}"#;
        assert!(engine.handle_message_at(msg(delete, 1), base).is_empty());
        assert_eq!(engine.pending_len(), 1);
        assert_eq!(engine.next_deadline(), Some(base + Duration::from_millis(500)));

        let emitted = engine.run_due_tasks(base + Duration::from_millis(500));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].operation, CdcOperation::Delete);
        assert_eq!(engine.pending_len(), 0);
        assert_eq!(sink.len(), 1);

        let histogram = metrics
            .processing_duration_seconds
            .with_label_values(&["users", "delete"]);
        assert_eq!(histogram.get_sample_count(), 1);
        assert!((histogram.get_sample_sum() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_reschedules_itself() {
        let base = Instant::now();
        let (mut engine, sink, _) = engine(base);

        let at = base + Duration::from_secs(30);
        assert!(engine.run_due_tasks(at).is_empty());
        assert_eq!(engine.next_deadline(), Some(at + Duration::from_secs(30)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let base = Instant::now();
        let (mut engine, sink, _) = engine(base);

        let delete = r#"{"table":"users","type":"DELETE","commitTs":1,"old":{"id":7}}"#;
        engine.handle_message_at(msg(delete, 1), base);
        engine.shutdown();

        assert_eq!(engine.pending_len(), 0);
        assert_eq!(engine.next_deadline(), None);
        assert!(engine.run_due_tasks(base + Duration::from_secs(60)).is_empty());
        assert!(sink.is_empty());
    }
}
