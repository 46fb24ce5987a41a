//! Deferred task scheduling for the reconciliation engine.
//!
//! Tasks are held in a min-heap ordered by deadline and only run when the
//! owner polls with the current time, so the caller decides when deferred
//! work executes relative to message handling.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use super::models::CommitTimestamp;
use super::pending::PendingKey;

/// Handle returned by [`Scheduler::schedule_at`], used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Work a scheduled task performs when it fires
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Emit the pending delete as standalone if it is still unclaimed
    FinalizeDelete {
        key: PendingKey,
        commit_ts: CommitTimestamp,
    },
    /// Discard stale pending deletes, then reschedule
    Sweep,
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub deadline: Instant,
    pub kind: TaskKind,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior; ties fire in scheduling order
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One-shot deferred tasks keyed by deadline
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: BinaryHeap<ScheduledTask>,
    /// Ids still eligible to fire; heap entries missing here are cancelled
    live: HashSet<TaskId>,
    next_task_id: u64,
}

/// Deadline used when `now + delay` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, deadline: Instant, kind: TaskKind) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        self.tasks.push(ScheduledTask { id, deadline, kind });
        self.live.insert(id);
        id
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, kind: TaskKind) -> TaskId {
        let deadline = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.schedule_at(deadline, kind)
    }

    /// Cancel a task that has not fired yet.
    ///
    /// Returns false for tasks that already ran or were already cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.live.remove(&id)
    }

    /// Pop every live task due at or before `now`, earliest first
    pub fn poll_due(&mut self, now: Instant) -> Vec<ScheduledTask> {
        let mut fired = Vec::new();

        while self.tasks.peek().is_some_and(|t| t.deadline <= now) {
            let Some(task) = self.tasks.pop() else {
                break;
            };
            if self.live.remove(&task.id) {
                fired.push(task);
            }
        }

        fired
    }

    /// Deadline of the earliest live task
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(task) = self.tasks.peek() {
            if self.live.contains(&task.id) {
                return Some(task.deadline);
            }
            self.tasks.pop();
        }
        None
    }

    /// Number of live (not cancelled) tasks
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every outstanding task
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.live.clear();
    }
}
