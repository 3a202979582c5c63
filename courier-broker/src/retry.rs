//! Retry policy for broker operations.
//!
//! Every retried broker call (dialing, publishing, declaring) goes through
//! [`retry`] with a [`RetryPolicy`] describing how many attempts are allowed
//! and how long to wait between them. The delay before attempt `k + 1` is
//! `base_delay * factor^(k - 1)`, uncapped. Errors that report
//! [`Retryable::is_retryable`] as `false` short-circuit the loop, and the
//! shutdown signal aborts an in-progress wait immediately.

use std::{future::Future, time::Duration};

use tokio::sync::watch;

/// Classifies whether a failed attempt may succeed if repeated.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How a retried operation ended without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A non-retryable error; returned as soon as it was seen.
    Permanent(E),
    /// The attempt budget ran out. Holds every attempt's error, oldest first.
    Exhausted(Vec<E>),
    /// Shutdown was signalled. Holds the errors seen before it.
    Shutdown(Vec<E>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, `None` for unbounded.
    pub max_attempts: Option<u32>,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Multiplier applied to the delay after each further failure.
    pub factor: u32,
}

impl RetryPolicy {
    /// A policy that keeps trying until success or shutdown.
    #[must_use]
    pub const fn unbounded(base_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            factor: 2,
        }
    }

    /// A policy allowing at most `max_attempts` attempts in total.
    #[must_use]
    pub const fn bounded(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay,
            factor: 2,
        }
    }

    /// Whether attempt number `attempt` (1-indexed) may run.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// Saturates instead of overflowing, so an unbounded policy simply ends
    /// up waiting "forever" rather than panicking.
    #[must_use]
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let multiplier = self.factor.saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier)
    }
}

/// Resolves once `done` reads `true` or its sender is gone.
pub async fn signalled(done: &mut watch::Receiver<bool>) {
    let _ = done.wait_for(|done| *done).await;
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `done` is signalled.
///
/// `operation` receives the 1-indexed attempt number.
///
/// # Errors
///
/// See [`RetryError`] for the three ways this can end without a value.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    done: &mut watch::Receiver<bool>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut errors = Vec::new();
    let mut attempt = 1;

    loop {
        if *done.borrow() {
            return Err(RetryError::Shutdown(errors));
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(RetryError::Permanent(err)),
            Err(err) => errors.push(err),
        }

        if !policy.allows(attempt + 1) {
            return Err(RetryError::Exhausted(errors));
        }

        tokio::select! {
            biased;

            () = signalled(done) => return Err(RetryError::Shutdown(errors)),
            () = tokio::time::sleep(policy.delay_after(attempt)) => {}
        }

        attempt += 1;
    }
}
