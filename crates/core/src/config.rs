//! Pipeline configuration.
//!
//! Values come from defaults, an optional JSON file, and `VIDLENS_*`
//! environment variables, in that order of precedence (lowest first).

use std::{ops::RangeInclusive, path::Path, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VidlensError};

/// Upper bound of images a single vision request may carry.
pub const MAX_FRAMES_PER_SEGMENT: usize = 5;

/// Worker counts known to stay within the remote service's sustainable rate.
pub const WORKER_COUNT_RANGE: RangeInclusive<usize> = 1..=8;

const RETRY_ATTEMPTS_RANGE: RangeInclusive<u32> = 1..=10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window_length_seconds: f64,
    pub frames_per_segment: usize,
    pub max_frame_dimension_px: u32,
    pub jpeg_quality: u8,
    pub worker_count: usize,
    /// Total attempts per vision call, the first one included.
    pub retry_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Deadline for a single attempt.
    pub request_timeout_ms: u64,
    /// Deadline for the whole run.
    pub overall_timeout_ms: Option<u64>,
    /// Route frame extraction through one decode lock.
    pub serialize_decode: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_length_seconds: 120.0,
            frames_per_segment: 3,
            max_frame_dimension_px: 384,
            jpeg_quality: 75,
            worker_count: 3,
            retry_max_attempts: 4,
            backoff_base_ms: 3_000,
            backoff_cap_ms: 30_000,
            backoff_jitter_ms: 1_000,
            request_timeout_ms: 300_000,
            overall_timeout_ms: None,
            serialize_decode: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl PipelineConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let json_content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json_content)?)
    }

    /// Override fields from `VIDLENS_*` environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("VIDLENS_WINDOW_SECONDS") {
            self.window_length_seconds = v;
        }
        if let Some(v) = env_parse("VIDLENS_FRAMES_PER_SEGMENT") {
            self.frames_per_segment = v;
        }
        if let Some(v) = env_parse("VIDLENS_MAX_FRAME_PX") {
            self.max_frame_dimension_px = v;
        }
        if let Some(v) = env_parse("VIDLENS_JPEG_QUALITY") {
            self.jpeg_quality = v;
        }
        if let Some(v) = env_parse("VIDLENS_WORKERS") {
            self.worker_count = v;
        }
        if let Some(v) = env_parse("VIDLENS_RETRY_ATTEMPTS") {
            self.retry_max_attempts = v;
        }
        if let Some(v) = env_parse("VIDLENS_BACKOFF_BASE_MS") {
            self.backoff_base_ms = v;
        }
        if let Some(v) = env_parse("VIDLENS_BACKOFF_CAP_MS") {
            self.backoff_cap_ms = v;
        }
        if let Some(v) = env_parse("VIDLENS_BACKOFF_JITTER_MS") {
            self.backoff_jitter_ms = v;
        }
        if let Some(v) = env_parse("VIDLENS_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v;
        }
        if let Some(v) = env_parse("VIDLENS_OVERALL_TIMEOUT_MS") {
            self.overall_timeout_ms = Some(v);
        }
        if let Some(v) = env_parse("VIDLENS_SERIALIZE_DECODE") {
            self.serialize_decode = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.window_length_seconds.is_finite() && self.window_length_seconds > 0.0) {
            return Err(VidlensError::invalid_input(format!(
                "window_length_seconds must be a positive number, got {}",
                self.window_length_seconds
            )));
        }
        if !(1..=MAX_FRAMES_PER_SEGMENT).contains(&self.frames_per_segment) {
            return Err(VidlensError::invalid_input(format!(
                "frames_per_segment must be within 1..={MAX_FRAMES_PER_SEGMENT}, got {}",
                self.frames_per_segment
            )));
        }
        if self.max_frame_dimension_px == 0 {
            return Err(VidlensError::invalid_input(
                "max_frame_dimension_px must be > 0",
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(VidlensError::invalid_input(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if !WORKER_COUNT_RANGE.contains(&self.worker_count) {
            return Err(VidlensError::invalid_input(format!(
                "worker_count must be within {}..={}, got {}",
                WORKER_COUNT_RANGE.start(),
                WORKER_COUNT_RANGE.end(),
                self.worker_count
            )));
        }
        if !RETRY_ATTEMPTS_RANGE.contains(&self.retry_max_attempts) {
            return Err(VidlensError::invalid_input(format!(
                "retry_max_attempts must be within {}..={}, got {}",
                RETRY_ATTEMPTS_RANGE.start(),
                RETRY_ATTEMPTS_RANGE.end(),
                self.retry_max_attempts
            )));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(VidlensError::invalid_input(format!(
                "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(VidlensError::invalid_input("request_timeout_ms must be > 0"));
        }
        if self.overall_timeout_ms == Some(0) {
            return Err(VidlensError::invalid_input("overall_timeout_ms must be > 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            jitter: Duration::from_millis(self.backoff_jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        self.overall_timeout_ms.map(Duration::from_millis)
    }
}

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        PipelineConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, capped. `attempt` is 1-based.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay to wait after failed attempt `attempt`, jitter drawn from `rng`.
    pub fn delay_for_attempt<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng.random_range(0..=jitter_ms)
        };

        (self.base_delay_for_attempt(attempt) + Duration::from_millis(jitter)).min(self.max_delay)
    }
}
