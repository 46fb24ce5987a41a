//! CDC event reconciliation: detection, normalization and DELETE+INSERT
//! correlation.

pub mod detector;
pub mod engine;
pub mod identity;
pub mod models;
pub mod normalizer;
pub mod pending;
pub mod scheduler;

pub use detector::{detect, Detected, Envelope};
pub use engine::ReconciliationEngine;
pub use models::{
    CanonicalEvent, CdcOperation, CommitTimestamp, MessageKey, Protocol, RawMessage, RowImage,
};
pub use pending::{PendingDelete, PendingDeleteStore, PendingKey};
pub use scheduler::{Scheduler, TaskId, TaskKind};
