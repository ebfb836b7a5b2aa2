use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SegmentFailure;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Read-only reference to a decodable video file.
#[derive(Debug, Clone)]
pub struct VideoHandle {
    path: PathBuf,
    duration: f64,
}

impl VideoHandle {
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// A time window of the video and the points sampled from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub sample_timestamps: Vec<f64>,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A downsampled JPEG still taken at `timestamp`.
#[derive(Clone)]
pub struct Frame {
    pub timestamp: f64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Frame {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", Self::MIME_TYPE, STANDARD.encode(&self.data))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Success,
    FallbackUsed,
    Failed,
}

/// The single, final outcome for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub status: SegmentStatus,
    pub description: String,
    pub frames_used: usize,
    pub error: Option<SegmentFailure>,
}

impl SegmentResult {
    pub fn success(segment: &Segment, description: String, frames_used: usize) -> Self {
        Self {
            index: segment.index,
            start_time: segment.start_time,
            end_time: segment.end_time,
            status: SegmentStatus::Success,
            description,
            frames_used,
            error: None,
        }
    }

    pub fn fallback(
        segment: &Segment,
        description: String,
        frames_used: usize,
        cause: SegmentFailure,
    ) -> Self {
        Self {
            index: segment.index,
            start_time: segment.start_time,
            end_time: segment.end_time,
            status: SegmentStatus::FallbackUsed,
            description,
            frames_used,
            error: Some(cause),
        }
    }

    pub fn failed(segment: &Segment, frames_used: usize, cause: SegmentFailure) -> Self {
        Self {
            index: segment.index,
            start_time: segment.start_time,
            end_time: segment.end_time,
            status: SegmentStatus::Failed,
            description: String::new(),
            frames_used,
            error: Some(cause),
        }
    }
}

/// Index-ordered outcomes of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub segments: Vec<SegmentResult>,
    pub succeeded: usize,
    pub fell_back: usize,
    pub failed: usize,
}

impl PipelineReport {
    pub fn new(run_id: Uuid, segments: Vec<SegmentResult>) -> Self {
        let count = |status| segments.iter().filter(|s| s.status == status).count();
        let succeeded = count(SegmentStatus::Success);
        let fell_back = count(SegmentStatus::FallbackUsed);
        let failed = count(SegmentStatus::Failed);

        Self {
            run_id,
            segments,
            succeeded,
            fell_back,
            failed,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments whose description text contains `query`, case-insensitively.
    pub fn search(&self, query: &str) -> Vec<&SegmentResult> {
        let query = query.to_lowercase();
        self.segments
            .iter()
            .filter(|s| !s.description.is_empty())
            .filter(|s| s.description.to_lowercase().contains(&query))
            .collect()
    }

    /// The segment covering `seconds`, if any.
    pub fn at(&self, seconds: f64) -> Option<&SegmentResult> {
        self.segments
            .iter()
            .find(|s| s.start_time <= seconds && seconds < s.end_time)
            .or_else(|| {
                self.segments
                    .last()
                    .filter(|s| (s.end_time - seconds).abs() < f64::EPSILON)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: usize, start: f64, end: f64) -> Segment {
        Segment {
            index,
            start_time: start,
            end_time: end,
            sample_timestamps: vec![start],
        }
    }

    #[test]
    fn report_counts_each_status() {
        let a = segment(0, 0.0, 120.0);
        let b = segment(1, 120.0, 240.0);
        let c = segment(2, 240.0, 250.0);
        let report = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::success(&a, "a slide about ownership".into(), 3),
                SegmentResult::fallback(
                    &b,
                    "transcript".into(),
                    0,
                    SegmentFailure::NoFrames { attempted: 3 },
                ),
                SegmentResult::failed(&c, 0, SegmentFailure::Cancelled),
            ],
        );

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.fell_back, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn search_is_case_insensitive_and_skips_empty() {
        let a = segment(0, 0.0, 120.0);
        let b = segment(1, 120.0, 240.0);
        let report = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::success(&a, "Speaker draws a Borrow Checker diagram".into(), 3),
                SegmentResult::failed(&b, 0, SegmentFailure::WorkerLost),
            ],
        );

        let hits = report.search("borrow checker");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
        assert!(report.search("").iter().all(|s| s.index == 0));
    }

    #[test]
    fn at_finds_covering_segment() {
        let a = segment(0, 0.0, 120.0);
        let b = segment(1, 120.0, 125.0);
        let report = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::success(&a, "x".into(), 1),
                SegmentResult::success(&b, "y".into(), 1),
            ],
        );

        assert_eq!(report.at(119.9).map(|s| s.index), Some(0));
        assert_eq!(report.at(120.0).map(|s| s.index), Some(1));
        assert_eq!(report.at(125.0).map(|s| s.index), Some(1));
        assert!(report.at(130.0).is_none());
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let a = segment(0, 0.0, 10.0);
        let result = SegmentResult::failed(&a, 0, SegmentFailure::Cancelled);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "cancelled");
    }
}
