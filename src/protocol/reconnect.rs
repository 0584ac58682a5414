//! Reconnection backoff policy.
//!
//! The delay sequence starts at zero and grows as `(delay + 500ms) * 2`:
//! 0, 1s, 3s, 7s, 15s, ... It is uncapped unless a ceiling is configured
//! with [`ReconnectPolicy::with_max_delay`]. Only transient errors (see
//! [`GatewayError::is_transient`]) keep the policy retrying.

use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;

/// Increment added before doubling the delay
const DELAY_STEP: Duration = Duration::from_millis(500);

/// Backoff and retry decisions for one command channel.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_delay: Option<Duration>,
    last_error: Option<Arc<GatewayError>>,
    retry: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectPolicy {
    /// Create a policy in the reset state
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            max_delay: None,
            last_error: None,
            retry: true,
        }
    }

    /// Cap the delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Clear delay and error state and re-enable retrying.
    pub fn reset(&mut self) -> &mut Self {
        self.last_error = None;
        self.delay = Duration::ZERO;
        self.retry = true;
        self
    }

    /// Whether another attempt should be made
    pub fn should_retry(&self) -> bool {
        self.retry
    }

    /// Record a failed attempt.
    ///
    /// A non-transient error disables retrying until the next [`reset`](Self::reset).
    pub fn observe_error(&mut self, error: GatewayError) {
        self.retry = self.retry && error.is_transient();
        self.last_error = Some(Arc::new(error));
    }

    /// Last recorded error
    pub fn last_error(&self) -> Option<Arc<GatewayError>> {
        self.last_error.clone()
    }

    /// Delay the next call to [`delay`](Self::delay) will wait
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Wait for the current delay, then grow it.
    pub async fn delay(&mut self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.advance();
    }

    fn advance(&mut self) {
        let next = self.delay.saturating_add(DELAY_STEP).saturating_mul(2);
        self.delay = match self.max_delay {
            Some(max) => next.min(max),
            None => next,
        };
    }
}
