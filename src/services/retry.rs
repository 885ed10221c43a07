//! Bounded, cancellable retry of an async probe.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attempt budget of a retry loop with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Why a retry loop stopped without a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt ran without producing a value.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        /// Error of the last attempt, if it failed rather than came up empty.
        last: Option<E>,
    },
    /// The token was cancelled before a value was observed.
    #[error("retry cancelled")]
    Cancelled,
}

/// Run `probe` until it yields `Some`, the policy runs out, or `cancel` fires.
///
/// `probe` receives the 1-based attempt number. `Ok(None)` and `Err(_)` both
/// count as an unsuccessful attempt.
pub async fn retry_until<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = probe(attempt) => outcome,
        };

        match outcome {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => last = None,
            Err(err) => last = Some(err),
        }

        if attempt == policy.max_attempts {
            break;
        }
        debug!(attempt, delay_ms = policy.delay.as_millis() as u64, "retrying");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = sleep(policy.delay) => {}
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last,
    })
}
