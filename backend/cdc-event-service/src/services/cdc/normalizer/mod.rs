//! Wire-format normalizers.
//!
//! Each detected variant is handled by one [`Normalizer`]; all of them turn an
//! [`Envelope`] into zero or more canonical events.

mod canal;
mod simple;
mod split_update;

pub use canal::CanalArrayNormalizer;
pub use simple::SimpleProtocolNormalizer;
pub use split_update::{FinalizedDelete, SplitUpdateNormalizer};

use tokio::time::Instant;

use super::detector::Envelope;
use super::models::{CanonicalEvent, Protocol};
use super::scheduler::Scheduler;

/// Execution context shared with normalizers that defer work
pub struct NormalizeContext<'a> {
    pub now: Instant,
    pub scheduler: &'a mut Scheduler,
}

pub trait Normalizer {
    fn protocol(&self) -> Protocol;

    fn normalize(
        &mut self,
        envelope: Envelope,
        ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent>;
}
