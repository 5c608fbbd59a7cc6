use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::{broadcast::events::SendResult, domain::ChatId, messaging::types::SendError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded retry policy for a single recipient.
///
/// Transient failures back off exponentially (`base * 2^k`: 2s, 4s, 8s with
/// the default base). Rate-limit waits come from the transport and do not
/// advance `k`. Blocked destinations and rejected content are never retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Added on top of the transport's `retry_after`.
    pub rate_limit_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(1),
            rate_limit_margin: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before retrying after the `step`-th transient failure (1-based).
    pub fn backoff(&self, step: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(step.min(16)))
    }

    pub async fn send_with_retry<F, Fut>(&self, chat_id: &ChatId, mut op: F) -> SendResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff_step = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(()) => return SendResult::ok(),
                Err(e) => e,
            };
            let attempts_left = attempt < max_attempts;

            let wait = match &err {
                SendError::Blocked(msg) => {
                    tracing::info!(%chat_id, error = %msg, "destination refuses delivery");
                    return SendResult::blocked(msg.clone());
                }
                SendError::Rejected(msg) => {
                    tracing::warn!(%chat_id, error = %msg, "message rejected, not retrying");
                    return SendResult::failed(msg.clone());
                }
                SendError::RateLimited { retry_after } if attempts_left => {
                    *retry_after + self.rate_limit_margin
                }
                SendError::Transient(_) if attempts_left => {
                    backoff_step += 1;
                    self.backoff(backoff_step)
                }
                _ => {
                    tracing::warn!(%chat_id, attempt, error = %err, "send failed, attempts exhausted");
                    return SendResult::failed(err.to_string());
                }
            };

            tracing::debug!(
                %chat_id,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "send failed, retrying"
            );
            sleep(wait).await;
        }
    }
}
