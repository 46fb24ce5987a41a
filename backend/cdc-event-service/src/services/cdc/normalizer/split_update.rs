/// Split-Update Normalizer
///
/// Some sources encode a logical UPDATE as a DELETE of the old row followed
/// by an INSERT of the new one, linked only by the transaction's commit
/// timestamp. This normalizer pairs them back up:
///
/// ```text
/// DELETE(id, ts) ──► pending store ──► finalize task (window)
///                         │                   │
/// INSERT(id, ts) ── claim ┘                   └── standalone DELETE
///        │
///        └──► UPDATE(old = DELETE image, new = INSERT image)
/// ```
///
/// Correlation is claim-by-deletion: whichever of the INSERT handler or the
/// finalize task removes the pending entry first decides the outcome, the
/// other observes absence and falls back (standalone INSERT or no-op).
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::services::cdc::detector::Envelope;
use crate::services::cdc::identity::extract_record_id;
use crate::services::cdc::models::{as_row, CanonicalEvent, CdcOperation, CommitTimestamp, Protocol};
use crate::services::cdc::pending::{PendingDelete, PendingDeleteStore, PendingKey};
use crate::services::cdc::scheduler::{Scheduler, TaskKind};

/// A standalone DELETE released by its finalize task
#[derive(Debug, Clone)]
pub struct FinalizedDelete {
    pub event: CanonicalEvent,
    /// When the originating DELETE was captured
    pub captured_at: Instant,
}

#[derive(Debug)]
pub struct SplitUpdateNormalizer {
    store: PendingDeleteStore,
    correlation_window: Duration,
    stale_threshold: Duration,
}

impl SplitUpdateNormalizer {
    pub fn new(correlation_window: Duration, stale_threshold: Duration) -> Self {
        Self {
            store: PendingDeleteStore::new(),
            correlation_window,
            stale_threshold,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.store.len()
    }

    /// Finalize task body: emit the DELETE only if still unclaimed with the
    /// same commit timestamp
    pub fn finalize(
        &mut self,
        key: &PendingKey,
        commit_ts: &CommitTimestamp,
    ) -> Option<FinalizedDelete> {
        match self.store.claim(key, commit_ts) {
            Some(pending) => {
                debug!(
                    key = %key,
                    commit_ts = %commit_ts,
                    "Correlation window elapsed, finalizing DELETE"
                );
                let captured_at = pending.captured_at;
                Some(FinalizedDelete {
                    event: standalone_delete(key, pending),
                    captured_at,
                })
            }
            None => {
                debug!(key = %key, commit_ts = %commit_ts, "Pending delete already claimed");
                None
            }
        }
    }

    /// Discard pending deletes older than the staleness threshold.
    ///
    /// Never emits; returns how many entries were dropped.
    pub fn sweep(&mut self, now: Instant, scheduler: &mut Scheduler) -> usize {
        let removed = self.store.purge_stale(now, self.stale_threshold);
        for (_, pending) in &removed {
            if let Some(task) = pending.finalize_task {
                scheduler.cancel(task);
            }
        }
        removed.len()
    }

    /// Drop all in-flight correlation state
    pub fn clear(&mut self) {
        self.store.clear();
    }

    fn on_delete(
        &mut self,
        envelope: Envelope,
        ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent> {
        let mut event = envelope.event(CdcOperation::Delete, Protocol::SplitUpdate);
        event.data = as_row(envelope.payload.get("data"));
        event.old_data = as_row(envelope.payload.get("old"));

        let Some(old_data) = event.old_data.clone() else {
            return vec![event];
        };
        let Some(record_id) = extract_record_id(&old_data) else {
            debug!(table = %event.table, "DELETE without record identity, emitting immediately");
            return vec![event];
        };
        event.record_id = Some(record_id.clone());

        // Without a commit timestamp no INSERT can ever match
        let Some(commit_ts) = event.commit_timestamp.clone() else {
            return vec![event];
        };

        let key = PendingKey::new(event.table.clone(), record_id);

        if let Some(existing) = self.store.get_mut(&key) {
            if existing.commit_ts == commit_ts {
                debug!(
                    key = %key,
                    commit_ts = %commit_ts,
                    "Redelivered DELETE, keeping original window"
                );
                existing.old_data = old_data;
                return Vec::new();
            }
        }

        let finalize_task = ctx.scheduler.schedule_after(
            ctx.now,
            self.correlation_window,
            TaskKind::FinalizeDelete {
                key: key.clone(),
                commit_ts: commit_ts.clone(),
            },
        );

        let pending = PendingDelete {
            commit_ts: commit_ts.clone(),
            captured_at: ctx.now,
            old_data,
            schema: event.schema.clone(),
            partition: event.partition,
            offset: event.offset,
            message_key: event.key.clone(),
            finalize_task: Some(finalize_task),
        };

        debug!(
            key = %key,
            commit_ts = %commit_ts,
            window_ms = self.correlation_window.as_millis() as u64,
            "Holding DELETE for correlation"
        );

        match self.store.insert(key.clone(), pending) {
            // A newer DELETE for the same record settles the older one
            Some(superseded) => {
                if let Some(task) = superseded.finalize_task {
                    ctx.scheduler.cancel(task);
                }
                debug!(
                    key = %key,
                    superseded_ts = %superseded.commit_ts,
                    "Pending DELETE superseded, emitting it standalone"
                );
                vec![standalone_delete(&key, superseded)]
            }
            None => Vec::new(),
        }
    }

    fn on_insert(
        &mut self,
        envelope: Envelope,
        ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent> {
        let mut event = envelope.event(CdcOperation::Insert, Protocol::SplitUpdate);
        event.data = as_row(envelope.payload.get("data"));

        let Some(record_id) = event.data.as_ref().and_then(extract_record_id) else {
            return vec![event];
        };
        event.record_id = Some(record_id.clone());

        let Some(commit_ts) = event.commit_timestamp.clone() else {
            return vec![event];
        };

        let key = PendingKey::new(event.table.clone(), record_id);
        if let Some(pending) = self.store.claim(&key, &commit_ts) {
            if let Some(task) = pending.finalize_task {
                ctx.scheduler.cancel(task);
            }
            debug!(key = %key, commit_ts = %commit_ts, "Correlated DELETE+INSERT into UPDATE");
            event.operation = CdcOperation::Update;
            event.old_data = Some(pending.old_data);
            if event.schema.is_none() {
                event.schema = pending.schema;
            }
        }

        vec![event]
    }
}

impl Normalizer for SplitUpdateNormalizer {
    fn protocol(&self) -> Protocol {
        Protocol::SplitUpdate
    }

    fn normalize(
        &mut self,
        envelope: Envelope,
        ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent> {
        let operation = envelope
            .type_tag()
            .map(CdcOperation::from_tag)
            .unwrap_or(CdcOperation::Unknown);

        match operation {
            CdcOperation::Delete => self.on_delete(envelope, ctx),
            CdcOperation::Insert => self.on_insert(envelope, ctx),
            other => {
                let mut event = envelope.event(other, Protocol::SplitUpdate);
                event.data = as_row(envelope.payload.get("data"));
                event.old_data = as_row(envelope.payload.get("old"));
                event.record_id = event
                    .data
                    .as_ref()
                    .or(event.old_data.as_ref())
                    .and_then(extract_record_id);
                vec![event]
            }
        }
    }
}

fn standalone_delete(key: &PendingKey, pending: PendingDelete) -> CanonicalEvent {
    CanonicalEvent {
        schema: pending.schema,
        old_data: Some(pending.old_data),
        record_id: Some(key.record_id.clone()),
        commit_timestamp: Some(pending.commit_ts),
        partition: pending.partition,
        offset: pending.offset,
        key: pending.message_key,
        ..CanonicalEvent::new(key.table.clone(), CdcOperation::Delete, Protocol::SplitUpdate)
    }
}
