use std::{sync::Arc, time::Instant};

use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    aggregate::ResultAggregator,
    cancel::{CancelToken, cancellation},
    config::PipelineConfig,
    error::{Result, SegmentFailure, VidlensError},
    frames::{FrameExtractor, apply_decode_policy},
    inference::{InferenceClient, Sleeper, VisionService},
    planner::plan_segments,
    pool::{ProgressCallback, SegmentJob, SegmentWorkerPool},
    prompt::transcript_context,
    transcript::{fallback_description, transcript_for_range},
    types::{PipelineReport, Segment, Transcript, VideoHandle},
};

/// Segment-parallel visual analysis of one video.
pub struct VisualPipeline {
    config: PipelineConfig,
    extractor: Arc<dyn FrameExtractor>,
    client: InferenceClient,
    progress: Option<ProgressCallback>,
}

impl VisualPipeline {
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn FrameExtractor>,
        service: Arc<dyn VisionService>,
    ) -> Result<Self> {
        config.validate()?;
        let client = InferenceClient::new(service, config.retry_policy(), config.request_timeout());
        let extractor = apply_decode_policy(extractor, &config);
        Ok(Self {
            config,
            extractor,
            client,
            progress: None,
        })
    }

    /// Replace how backoff waits are performed.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.client = self.client.with_sleeper(sleeper);
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn plan(&self, video: &VideoHandle) -> Result<Vec<Segment>> {
        plan_segments(
            video.duration(),
            self.config.window_length_seconds,
            self.config.frames_per_segment,
        )
    }

    /// Describe every segment of `video`.
    ///
    /// Per-segment failures end up inside the report. The call itself only
    /// fails on invalid input, or with [`VidlensError::ServiceUnavailable`]
    /// when no segment got past the remote service.
    pub async fn analyze(
        &self,
        video: &VideoHandle,
        transcript: Option<&Transcript>,
        cancel: CancelToken,
    ) -> Result<PipelineReport> {
        let segments = self.plan(video)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("visual_pipeline", %run_id, segments = segments.len());

        async move {
            let started = Instant::now();
            info!(
                video = %video.path().display(),
                duration = video.duration(),
                workers = self.config.worker_count,
                "starting visual analysis"
            );

            let jobs = segments
                .iter()
                .map(|segment| build_job(segment, transcript))
                .collect();
            let mut aggregator = ResultAggregator::new(&segments);

            let pool = SegmentWorkerPool::new(
                self.extractor.clone(),
                self.client.clone(),
                self.config.worker_count,
            );
            let (handle, token) = cancellation();
            if cancel.is_cancelled() {
                handle.cancel();
            }
            let deadline = self.config.overall_timeout();
            let watcher = tokio::spawn(async move {
                match deadline {
                    Some(limit) => {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(limit) => {
                                warn!(timeout_ms = limit.as_millis() as u64, "overall deadline reached, cancelling");
                            }
                        }
                    }
                    None => cancel.cancelled().await,
                }
                handle.cancel();
            });

            pool.run(video, jobs, &mut aggregator, &token, self.progress.as_ref())
                .await;
            watcher.abort();

            let missing = if token.is_cancelled() {
                SegmentFailure::Cancelled
            } else {
                SegmentFailure::WorkerLost
            };
            let report = aggregator.finish(run_id, missing);

            info!(
                succeeded = report.succeeded,
                fell_back = report.fell_back,
                failed = report.failed,
                cancelled = token.is_cancelled(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "visual analysis finished"
            );

            if service_unavailable(&report) {
                return Err(VidlensError::ServiceUnavailable {
                    report: Box::new(report),
                });
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

fn build_job(segment: &Segment, transcript: Option<&Transcript>) -> SegmentJob {
    let chunk = transcript
        .map(|t| transcript_for_range(t, segment.start_time, segment.end_time))
        .unwrap_or_default();

    SegmentJob {
        segment: segment.clone(),
        context: transcript_context(&chunk),
        fallbacks: fallback_description(&chunk).into_iter().collect(),
    }
}

/// No segment succeeded and every one of them failed against the remote service.
fn service_unavailable(report: &PipelineReport) -> bool {
    report.succeeded == 0
        && !report.is_empty()
        && report
            .segments
            .iter()
            .all(|s| s.error.as_ref().is_some_and(SegmentFailure::is_remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{InferenceError, ServiceError},
        types::{SegmentResult, TranscriptSegment},
    };

    fn segment(index: usize) -> Segment {
        let start = index as f64 * 120.0;
        Segment {
            index,
            start_time: start,
            end_time: start + 120.0,
            sample_timestamps: vec![start],
        }
    }

    fn remote() -> SegmentFailure {
        InferenceError::RetryExhausted {
            attempts: 4,
            last: ServiceError::RateLimited {
                retry_after_ms: None,
            },
        }
        .into()
    }

    #[test]
    fn job_carries_transcript_window() {
        let transcript = Transcript {
            text: String::new(),
            language: "en".into(),
            segments: vec![TranscriptSegment {
                start: 130.0,
                end: 140.0,
                text: " borrow checking".into(),
            }],
        };

        let first = build_job(&segment(0), Some(&transcript));
        assert!(first.context.is_none());
        assert!(first.fallbacks.is_empty());

        let second = build_job(&segment(1), Some(&transcript));
        assert!(second.context.unwrap().contains("borrow checking"));
        assert_eq!(
            second.fallbacks,
            vec!["[Visual analysis unavailable for this segment] borrow checking".to_string()]
        );
    }

    #[test]
    fn unavailable_only_when_every_segment_failed_remotely() {
        let all_remote = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::failed(&segment(0), 3, remote()),
                SegmentResult::fallback(&segment(1), "t".into(), 3, remote()),
            ],
        );
        assert!(service_unavailable(&all_remote));

        let one_cancelled = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::failed(&segment(0), 3, remote()),
                SegmentResult::failed(&segment(1), 0, SegmentFailure::Cancelled),
            ],
        );
        assert!(!service_unavailable(&one_cancelled));

        let one_success = PipelineReport::new(
            Uuid::new_v4(),
            vec![
                SegmentResult::failed(&segment(0), 3, remote()),
                SegmentResult::success(&segment(1), "d".into(), 3),
            ],
        );
        assert!(!service_unavailable(&one_success));
    }
}
