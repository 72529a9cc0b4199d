// src/notify/retry.rs
//! Bounded retry with capped exponential backoff for message sends.

use std::time::Duration;

use metrics::counter;

use super::{Ack, MessageChannel, Recipient};
use crate::error::RelayError;

pub const MAX_SEND_ATTEMPTS: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const SEND_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SEND_ATTEMPTS,
            base_delay: BASE_BACKOFF,
            max_delay: MAX_BACKOFF,
            attempt_timeout: SEND_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Same attempt count, no waiting between attempts.
    pub fn without_backoff() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Pause after failed attempt `attempt` (1-based): base, 2×base, 4×base, … capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { attempts: u32, ack: Ack },
    Failed { attempts: u32, last_error: String },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SendOutcome::Delivered { attempts, .. } | SendOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Send `text`, retrying failed or timed-out attempts. Never returns an error: an
/// exhausted sequence is reported as `SendOutcome::Failed`.
pub async fn send_with_retry(
    channel: &dyn MessageChannel,
    recipient: &Recipient,
    text: &str,
    policy: &RetryPolicy,
) -> SendOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        counter!("relay_send_attempts_total").increment(1);

        let res = match tokio::time::timeout(policy.attempt_timeout, channel.send(recipient, text))
            .await
        {
            Ok(r) => r,
            Err(_) => Err(RelayError::SendFailure(format!(
                "no response within {:?}",
                policy.attempt_timeout
            ))),
        };

        match res {
            Ok(ack) => {
                return SendOutcome::Delivered {
                    attempts: attempt,
                    ack,
                }
            }
            Err(e) if attempt < max_attempts => {
                let pause = policy.backoff(attempt);
                tracing::warn!(
                    target: "notify",
                    channel = channel.name(),
                    attempt,
                    retry_in_ms = pause.as_millis() as u64,
                    error = %e,
                    "send attempt failed"
                );
                tokio::time::sleep(pause).await;
            }
            Err(e) => {
                tracing::error!(
                    target: "notify",
                    channel = channel.name(),
                    attempts = attempt,
                    error = %e,
                    "giving up on message"
                );
                return SendOutcome::Failed {
                    attempts: attempt,
                    last_error: e.to_string(),
                };
            }
        }
    }
}
