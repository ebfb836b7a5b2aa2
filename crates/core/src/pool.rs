//! Bounded-concurrency segment execution.
//!
//! Every segment gets its own task up front, but a task only extracts frames
//! and calls the vision service while holding one of `worker_count` permits.
//! Results are handed to the [`ResultAggregator`] in completion order.

use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Instrument, info, info_span, warn};

use crate::{
    aggregate::ResultAggregator,
    cancel::CancelToken,
    error::SegmentFailure,
    frames::FrameExtractor,
    inference::InferenceClient,
    prompt::segment_instruction,
    types::{Segment, SegmentResult, VideoHandle},
};

/// Called with `(completed, total)` each time a segment settles.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// One segment plus what the worker needs besides the video.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment: Segment,
    /// Extra knowledge forwarded to the vision service.
    pub context: Option<String>,
    /// Substitute descriptions, tried in order when visual analysis is unavailable.
    pub fallbacks: Vec<String>,
}

impl SegmentJob {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            context: None,
            fallbacks: Vec::new(),
        }
    }
}

pub struct SegmentWorkerPool {
    extractor: Arc<dyn FrameExtractor>,
    client: InferenceClient,
    worker_count: usize,
}

impl SegmentWorkerPool {
    pub fn new(
        extractor: Arc<dyn FrameExtractor>,
        client: InferenceClient,
        worker_count: usize,
    ) -> Self {
        Self {
            extractor,
            client,
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Process every job and record its result into `aggregator`.
    ///
    /// Returns once every task has settled. After `cancel` fires, segments
    /// that have not started yet settle as cancelled without doing any work.
    pub async fn run(
        &self,
        video: &VideoHandle,
        jobs: Vec<SegmentJob>,
        aggregator: &mut ResultAggregator,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            let client = self.client.clone();
            let video = video.clone();
            let cancel = cancel.clone();
            let span = info_span!("segment", segment = job.segment.index);

            tasks.spawn(
                async move {
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return SegmentResult::failed(&job.segment, 0, SegmentFailure::Cancelled);
                        }
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => {
                                return SegmentResult::failed(&job.segment, 0, SegmentFailure::WorkerLost);
                            }
                        },
                    };

                    process_segment(extractor.as_ref(), &client, &video, &job, &cancel).await
                }
                .instrument(span),
            );
        }

        let total = aggregator.total();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if aggregator.record(result)
                        && let Some(progress) = progress
                    {
                        progress(aggregator.completed(), total);
                    }
                }
                Err(e) => warn!(error = %e, "segment worker stopped without a result"),
            }
        }
    }
}

async fn process_segment(
    extractor: &dyn FrameExtractor,
    client: &InferenceClient,
    video: &VideoHandle,
    job: &SegmentJob,
    cancel: &CancelToken,
) -> SegmentResult {
    let segment = &job.segment;
    let mut frames = Vec::with_capacity(segment.sample_timestamps.len());

    for &timestamp in &segment.sample_timestamps {
        let extracted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return SegmentResult::failed(segment, frames.len(), SegmentFailure::Cancelled);
            }
            extracted = extractor.extract(video, timestamp) => extracted,
        };

        match extracted {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!(timestamp, error = %e, "frame extraction failed"),
        }
    }

    let frames_used = frames.len();
    if frames.is_empty() {
        let cause = SegmentFailure::NoFrames {
            attempted: segment.sample_timestamps.len(),
        };
        return settle_failure(job, frames_used, cause);
    }

    let instruction = segment_instruction(segment);
    match client
        .describe(frames, &instruction, job.context.as_deref(), cancel)
        .await
    {
        Ok(description) => {
            info!(frames = frames_used, "segment described");
            SegmentResult::success(segment, description, frames_used)
        }
        Err(e) => settle_failure(job, frames_used, e.into()),
    }
}

/// Walk the fallback chain for a segment without a visual description.
fn settle_failure(job: &SegmentJob, frames_used: usize, cause: SegmentFailure) -> SegmentResult {
    if cause.allows_fallback()
        && let Some(text) = job.fallbacks.iter().find(|text| !text.trim().is_empty())
    {
        warn!(cause = %cause, "visual analysis unavailable, using fallback description");
        return SegmentResult::fallback(&job.segment, text.clone(), frames_used, cause);
    }

    warn!(cause = %cause, "segment failed");
    SegmentResult::failed(&job.segment, frames_used, cause)
}
