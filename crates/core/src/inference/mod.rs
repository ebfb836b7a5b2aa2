//! Remote vision inference.
//!
//! [`VisionService`] is a single request/response exchange with the remote
//! model. [`InferenceClient`] turns it into one logical `describe` call with
//! per-attempt timeouts, exponential backoff with jitter, and cancellation.

mod chat;
mod retry;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

pub use chat::ChatCompletionsService;
pub use retry::{Sleeper, TokioSleeper, retry_delay};

use crate::{
    cancel::CancelToken,
    config::RetryPolicy,
    error::{InferenceError, ServiceError},
    types::Frame,
};

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub images: Vec<Frame>,
    pub instruction: String,
    /// Prior knowledge about the segment, such as the spoken transcript.
    pub context: Option<String>,
}

#[async_trait]
pub trait VisionService: Send + Sync {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ServiceError>;
}

#[derive(Clone)]
pub struct InferenceClient {
    service: Arc<dyn VisionService>,
    policy: RetryPolicy,
    request_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl InferenceClient {
    pub fn new(
        service: Arc<dyn VisionService>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            policy,
            request_timeout,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Describe `frames` following `instruction`.
    ///
    /// Transient failures are retried until `max_attempts` calls were made in
    /// total. Anything else returns on the first failure.
    pub async fn describe(
        &self,
        frames: Vec<Frame>,
        instruction: &str,
        context: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, InferenceError> {
        let request = VisionRequest {
            images: frames,
            instruction: instruction.to_string(),
            context: context.map(str::to_string),
        };
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                outcome = tokio::time::timeout(self.request_timeout, self.service.complete(&request)) => outcome,
            };

            let error = match outcome {
                Ok(Ok(description)) => {
                    debug!(attempt, "vision call succeeded");
                    return Ok(description);
                }
                Ok(Err(error)) => error,
                Err(_) => ServiceError::Timeout,
            };

            if !error.is_transient() {
                warn!(attempt, error = %error, "vision call failed permanently");
                return Err(InferenceError::Fatal { source: error });
            }
            if attempt >= max_attempts {
                warn!(attempt, error = %error, "vision call retries exhausted");
                return Err(InferenceError::RetryExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = retry_delay(&self.policy, attempt, &error, &mut rand::rng());
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "vision call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
