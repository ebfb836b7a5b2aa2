//! Backoff waiting.
//!
//! The schedule itself lives on [`RetryPolicy`]; this module decides the
//! actual wait after a failed attempt and owns the sleep capability so tests
//! never sleep for real.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::{config::RetryPolicy, error::ServiceError};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wait before the attempt following failed attempt `attempt`.
///
/// A `Retry-After` hint can only lengthen the jittered delay, never beyond the cap.
pub fn retry_delay<R: Rng>(
    policy: &RetryPolicy,
    attempt: u32,
    error: &ServiceError,
    rng: &mut R,
) -> Duration {
    let delay = policy.delay_for_attempt(attempt, rng);
    match error.retry_after() {
        Some(hint) => delay.max(hint.min(policy.max_delay)),
        None => delay,
    }
}
