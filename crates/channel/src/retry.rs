use super::{ChannelError, NotificationChannel, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Bounded retry for transport-level failures. An `Unreachable` answer is a
/// definitive reply and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries per send, first one included.
    pub max_attempts: u32,
    /// Upper bound for a single try.
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            timeout_ms: 10_000,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Exponential backoff before try number `attempt + 1`, with up to 20%
    /// jitter, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let capped = base.min(self.max_backoff_ms);
        let jitter = if capped >= 5 {
            rand::thread_rng().gen_range(0..=capped / 5)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_sub(jitter))
    }
}

pub struct RetryingChannel {
    inner: Arc<dyn NotificationChannel>,
    policy: RetryPolicy,
}

impl RetryingChannel {
    pub fn new(inner: Arc<dyn NotificationChannel>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self { inner, policy })
    }
}

#[async_trait]
impl NotificationChannel for RetryingChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(
        &self,
        address: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome, ChannelError> {
        let attempts = self.policy.max_attempts.max(1);
        let limit = self.policy.timeout();
        let mut last_err = ChannelError::Transport("no attempt made".to_string());

        for attempt in 1..=attempts {
            let result = match timeout(limit, self.inner.send(address, message)).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(limit)),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    tracing::warn!(
                        channel = %self.inner.name(),
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "channel send failed"
                    );
                    last_err = err;
                }
            }

            if attempt < attempts {
                sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(last_err)
    }
}
