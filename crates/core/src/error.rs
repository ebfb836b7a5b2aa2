use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{provider::ProviderError, types::PipelineReport};

#[derive(Error, Debug)]
pub enum VidlensError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error(
        "Vision service unavailable: all {} segments failed remotely",
        report.segments.len()
    )]
    ServiceUnavailable { report: Box<PipelineReport> },

    #[error("Probe failed for {video_path}: {reason}")]
    ProbeFailed { video_path: PathBuf, reason: String },

    #[error("Audio extraction failed for {video_path}: {reason}")]
    AudioExtractionFailed { video_path: PathBuf, reason: String },

    #[error("Transcription failed for {audio_path}: {reason}")]
    TranscriptFailed { audio_path: PathBuf, reason: String },

    #[error("Model download failed from {url}: {reason}")]
    ModelDownloadFailed { url: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),
}

impl VidlensError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VidlensError>;

/// Failure to produce a single frame. Never fatal for the segment.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Timestamp {timestamp:.3}s is outside the video (duration {duration:.3}s)")]
    OutOfRange { timestamp: f64, duration: f64 },

    #[error("Frame decode failed at {timestamp:.3}s: {reason}")]
    DecodeFailed { timestamp: f64, reason: String },

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One failed call against the remote vision service.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceError {
    #[error("Rate limited by vision service")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Vision request timed out")]
    Timeout,

    #[error("Vision service error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Vision service rejected credentials ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("Vision service rejected request ({status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("Vision service reported an error: {message}")]
    Rejected { message: String },

    #[error("Malformed vision response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Vision request could not be built: {reason}")]
    InvalidRequest { reason: String },
}

impl ServiceError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. }
                | ServiceError::Timeout
                | ServiceError::Server { .. }
                | ServiceError::Network { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            ServiceError::InvalidRequest {
                reason: e.to_string(),
            }
        } else if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::MalformedResponse {
                reason: e.to_string(),
            }
        } else {
            ServiceError::Network {
                message: e.to_string(),
            }
        }
    }
}

/// Outcome of a logical describe call after the retry policy ran.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceError {
    #[error("Non-transient vision failure: {source}")]
    Fatal { source: ServiceError },

    #[error("Vision call failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: ServiceError },

    #[error("Vision call cancelled")]
    Cancelled,
}

/// Why a segment did not get a visual description.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentFailure {
    #[error("No frame could be extracted ({attempted} attempted)")]
    NoFrames { attempted: usize },

    #[error("{error}")]
    Remote { error: InferenceError },

    #[error("Cancelled before completion")]
    Cancelled,

    #[error("Segment worker stopped without a result")]
    WorkerLost,
}

impl SegmentFailure {
    /// Only causes that leave the segment recoverable from transcript text.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            SegmentFailure::NoFrames { .. }
                | SegmentFailure::Remote {
                    error: InferenceError::RetryExhausted { .. }
                }
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SegmentFailure::Remote { .. })
    }
}

impl From<InferenceError> for SegmentFailure {
    fn from(error: InferenceError) -> Self {
        match error {
            InferenceError::Cancelled => SegmentFailure::Cancelled,
            error => SegmentFailure::Remote { error },
        }
    }
}
