use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{CdcError, Result};
use crate::metrics::ConsumerMetrics;
use crate::services::cdc::{RawMessage, ReconciliationEngine};

/// Threshold for consecutive errors before marking consumer as unhealthy
const UNHEALTHY_ERROR_THRESHOLD: u32 = 5;

/// Threshold for consecutive errors before emitting critical warning
const CRITICAL_ERROR_THRESHOLD: u32 = 10;

/// Ordered supply of raw messages.
///
/// `recv` must be cancel-safe: the consumer loop races it against the
/// engine's next deadline and drops it when a timer fires first.
#[async_trait]
pub trait MessageSource: Send {
    /// `Ok(None)` means the source is exhausted
    async fn recv(&mut self) -> Result<Option<RawMessage>>;
}

/// In-process source fed through a channel, used for replay and tests
pub struct ChannelMessageSource {
    rx: mpsc::Receiver<RawMessage>,
}

impl ChannelMessageSource {
    pub fn new(rx: mpsc::Receiver<RawMessage>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<RawMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl MessageSource for ChannelMessageSource {
    async fn recv(&mut self) -> Result<Option<RawMessage>> {
        Ok(self.rx.recv().await)
    }
}

/// Error handling state for the consumer loop
#[derive(Debug)]
pub struct ConsumerErrorState {
    consecutive_count: u32,
    last_success: Instant,
}

impl ConsumerErrorState {
    pub fn new() -> Self {
        Self {
            consecutive_count: 0,
            last_success: Instant::now(),
        }
    }

    /// Record a successful receive, resetting error count
    pub fn record_success(&mut self) {
        self.consecutive_count = 0;
        self.last_success = Instant::now();
    }

    /// Record an error, returning the new consecutive count
    pub fn record_error(&mut self) -> u32 {
        self.consecutive_count = self.consecutive_count.saturating_add(1);
        self.consecutive_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_count
    }

    pub fn time_since_success(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_success)
    }

    /// Exponential backoff: 1s -> 2s -> 4s -> ... -> 60s max
    pub fn calculate_backoff(&self) -> Duration {
        const MIN_BACKOFF_SECS: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 60;

        let errors = self.consecutive_errors();
        if errors == 0 {
            return Duration::from_secs(MIN_BACKOFF_SECS);
        }

        let backoff_secs = 2u64
            .saturating_pow(errors.saturating_sub(1))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(backoff_secs)
    }
}

impl Default for ConsumerErrorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information for the consumer loop
#[derive(Debug, Clone)]
pub struct ConsumerStatus {
    pub healthy: bool,
    pub consecutive_errors: u32,
    pub time_since_last_success: Duration,
    pub current_backoff: Duration,
    pub pending_deletes: usize,
}

/// Drives a [`ReconciliationEngine`] from a [`MessageSource`].
///
/// Messages are handled one at a time in arrival order. Deferred engine
/// tasks run between messages, never during one.
pub struct CdcEventConsumer<S: MessageSource> {
    source: S,
    engine: ReconciliationEngine,
    metrics: ConsumerMetrics,
    error_state: ConsumerErrorState,
}

impl<S: MessageSource> CdcEventConsumer<S> {
    pub fn new(source: S, engine: ReconciliationEngine, metrics: ConsumerMetrics) -> Self {
        Self {
            source,
            engine,
            metrics,
            error_state: ConsumerErrorState::new(),
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Returns false if consecutive errors exceed threshold or no success for too long
    pub fn is_healthy(&self) -> bool {
        let errors = self.error_state.consecutive_errors();

        if errors >= UNHEALTHY_ERROR_THRESHOLD {
            return false;
        }

        // Unhealthy if no success for more than 5 minutes
        if self.error_state.time_since_success() > Duration::from_secs(300) && errors > 0 {
            return false;
        }

        true
    }

    pub fn status(&self) -> ConsumerStatus {
        ConsumerStatus {
            healthy: self.is_healthy(),
            consecutive_errors: self.error_state.consecutive_errors(),
            time_since_last_success: self.error_state.time_since_success(),
            current_backoff: self.error_state.calculate_backoff(),
            pending_deletes: self.engine.pending_len(),
        }
    }

    /// Run until the source is exhausted
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the source is exhausted or `shutdown` resolves.
    ///
    /// On exit all timers are cancelled and pending deletes are dropped
    /// without being emitted.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting CDC event consumer loop");

        // While backing off the source stays idle but timers keep firing
        let mut resume_at: Option<Instant> = None;

        loop {
            let deadline = self.engine.next_deadline();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping CDC event consumer");
                    break;
                }
                _ = sleep_until(deadline) => {
                    self.engine.run_due_tasks(Instant::now());
                }
                _ = sleep_until(resume_at), if resume_at.is_some() => {
                    resume_at = None;
                }
                received = self.source.recv(), if resume_at.is_none() => match received {
                    Ok(Some(message)) => self.on_message(message),
                    Ok(None) => {
                        info!("Message source exhausted, stopping CDC event consumer");
                        break;
                    }
                    Err(e) => {
                        let backoff = self.on_error(&e);
                        resume_at = Some(Instant::now() + backoff);
                    }
                },
            }

            self.metrics
                .pending_deletes
                .set(self.engine.pending_len() as i64);
        }

        self.engine.shutdown();
        self.metrics.pending_deletes.set(0);
        Ok(())
    }

    fn on_message(&mut self, message: RawMessage) {
        self.error_state.record_success();
        self.metrics.consecutive_errors.set(0);
        self.metrics.consumer_healthy.set(1);
        self.metrics.backoff_seconds.set(0);

        debug!(
            partition = message.partition,
            offset = message.offset,
            "Received CDC message"
        );

        self.engine.handle_message_at(message, Instant::now());
    }

    fn on_error(&mut self, e: &CdcError) -> Duration {
        let consecutive = self.error_state.record_error();
        self.metrics.consumer_errors_total.inc();
        self.metrics.consecutive_errors.set(consecutive as i64);

        let backoff = self.error_state.calculate_backoff();
        self.metrics.backoff_seconds.set(backoff.as_secs() as i64);

        let healthy = self.is_healthy();
        self.metrics.consumer_healthy.set(if healthy { 1 } else { 0 });

        if consecutive >= CRITICAL_ERROR_THRESHOLD {
            error!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                time_since_success_secs = self.error_state.time_since_success().as_secs(),
                "CRITICAL: message source experiencing persistent failures. \
                 Manual intervention may be required. Error: {}",
                e
            );
        } else if consecutive >= UNHEALTHY_ERROR_THRESHOLD {
            warn!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                "Message source unhealthy - multiple consecutive errors. Error: {}",
                e
            );
        } else {
            error!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                "Message source error (will retry with backoff): {}",
                e
            );
        }

        backoff
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut state = ConsumerErrorState::new();
        assert_eq!(state.calculate_backoff(), Duration::from_secs(1));

        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for secs in expected {
            state.record_error();
            assert_eq!(state.calculate_backoff(), Duration::from_secs(secs));
        }

        state.record_success();
        assert_eq!(state.consecutive_errors(), 0);
    }
}
