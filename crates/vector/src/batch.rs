//! Batch sizing, backpressure and timeout retries for bulk upserts.
//!
//! With `dynamic` batching the controller follows an additive-increase /
//! multiplicative-decrease rule: a timeout or a slow batch halves both the
//! batch size and the in-flight bound, and a run of fast batches grows them
//! one step at a time back toward their ceilings.

use docindex_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;

/// Successful fast batches needed before growing again.
const GROWTH_STREAK: u32 = 3;

/// Batching and retry tuning for one connector.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Documents per upsert call (the starting size when dynamic)
    pub batch_size: usize,

    /// Resize batches from observed latency and timeouts
    pub dynamic: bool,

    /// Retries after a timeout before the batch fails
    pub timeout_retries: u32,

    /// Upsert batches allowed in flight at once
    pub max_in_flight: usize,

    /// Latency above which a batch counts as slow
    pub target_latency: Duration,

    /// Delay before the first retry; doubles per attempt
    pub retry_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dynamic: false,
            timeout_retries: 3,
            max_in_flight: 4,
            target_latency: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Tracks the current batch size and in-flight bound.
#[derive(Debug, Clone)]
pub struct BatchController {
    config: BatchConfig,
    batch_size: usize,
    in_flight: usize,
    max_batch_size: usize,
    streak: u32,
}

impl BatchController {
    pub fn new(config: BatchConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        let in_flight = config.max_in_flight.max(1);
        Self {
            max_batch_size: batch_size.saturating_mul(4),
            batch_size,
            in_flight,
            streak: 0,
            config,
        }
    }

    /// Size of the next batch to dispatch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// How many batches may be in flight right now.
    pub fn in_flight_limit(&self) -> usize {
        self.in_flight
    }

    /// Record a completed batch and its latency.
    pub fn on_success(&mut self, latency: Duration) {
        if !self.config.dynamic {
            return;
        }

        if latency > self.config.target_latency {
            self.shrink();
            return;
        }

        self.streak += 1;
        if self.streak >= GROWTH_STREAK {
            self.streak = 0;
            let step = (self.config.batch_size / 10).max(1);
            self.batch_size = (self.batch_size + step).min(self.max_batch_size);
            self.in_flight = (self.in_flight + 1).min(self.config.max_in_flight.max(1));
            tracing::debug!(
                batch_size = self.batch_size,
                in_flight = self.in_flight,
                "Growing upsert batches"
            );
        }
    }

    /// Record a timed-out attempt.
    pub fn on_timeout(&mut self) {
        if self.config.dynamic {
            self.shrink();
        }
    }

    fn shrink(&mut self) {
        self.streak = 0;
        self.batch_size = (self.batch_size / 2).max(1);
        self.in_flight = (self.in_flight / 2).max(1);
        tracing::debug!(
            batch_size = self.batch_size,
            in_flight = self.in_flight,
            "Shrinking upsert batches"
        );
    }
}

/// Run `op`, retrying transient failures up to `retries` extra times with
/// exponential backoff.
///
/// `on_timeout` is told about every transient failure. Exhausted retries
/// surface as `AppError::Index`; non-transient errors propagate unchanged.
pub async fn with_retries<T, F, Fut>(
    what: &str,
    retries: u32,
    backoff: Duration,
    mut on_timeout: impl FnMut(),
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                on_timeout();

                if attempt >= retries {
                    return Err(AppError::Index(format!(
                        "{} failed after {} attempts: {}",
                        what,
                        attempt + 1,
                        e
                    )));
                }

                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt));
                attempt += 1;
                tracing::warn!(
                    "{} timed out (attempt {}/{}), retrying in {}ms",
                    what,
                    attempt,
                    retries + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
