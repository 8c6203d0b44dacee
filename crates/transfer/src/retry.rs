use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;
use crate::capability::{BlockTransmitter, CapabilityFuture};

/// Retry schedule for a single block transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per block, including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Retries failed transmissions of the wrapped transmitter.
///
/// A cancelled transmission fails with [`TransferError::Cancelled`] as soon
/// as the token fires, whether an attempt or a backoff sleep is pending.
pub struct RetryTransmitter<T> {
    inner: T,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<T> RetryTransmitter<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandons attempts and backoff once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<T: BlockTransmitter> BlockTransmitter for RetryTransmitter<T> {
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a> {
        Box::pin(async move {
            let attempts = self.policy.max_attempts.max(1);
            let mut attempt = 0;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled.into());
                }

                let outcome = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!(index, attempt = attempt + 1, "block transmission cancelled");
                        return Err(TransferError::Cancelled.into());
                    }
                    outcome = self.inner.transmit(index, data) => outcome,
                };

                match outcome {
                    Ok(()) => return Ok(()),
                    Err(e) if attempt + 1 < attempts => {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            index,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "block transmission failed, retrying"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                debug!(index, "retry backoff cancelled");
                                return Err(TransferError::Cancelled.into());
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
