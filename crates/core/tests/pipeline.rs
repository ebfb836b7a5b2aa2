use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use vidlens_core::{
    CancelToken, Frame, FrameError, FrameExtractor, InferenceError, PipelineConfig,
    PipelineReport, SegmentFailure, SegmentStatus, ServiceError, Sleeper, Transcript,
    TranscriptSegment, VideoHandle, VidlensError, VisionRequest, VisionService, VisualPipeline,
    cancellation,
};

const WINDOW: f64 = 120.0;

struct FakeExtractor {
    failing: Vec<f64>,
}

impl FakeExtractor {
    fn healthy() -> Self {
        Self { failing: vec![] }
    }

    fn failing_at(timestamps: &[f64]) -> Self {
        Self {
            failing: timestamps.to_vec(),
        }
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract(&self, _video: &VideoHandle, timestamp: f64) -> Result<Frame, FrameError> {
        if self.failing.iter().any(|t| (t - timestamp).abs() < 1e-9) {
            return Err(FrameError::DecodeFailed {
                timestamp,
                reason: "corrupt stream".into(),
            });
        }
        Ok(Frame {
            timestamp,
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 4,
            height: 3,
            quality: 75,
        })
    }
}

#[derive(Default)]
struct CountingExtractor {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl FrameExtractor for CountingExtractor {
    async fn extract(&self, video: &VideoHandle, timestamp: f64) -> Result<Frame, FrameError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        tokio::time::sleep(Duration::from_millis(5)).await;
        FakeExtractor::healthy().extract(video, timestamp).await
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Describe,
    Transient,
    Fatal,
    Hang,
}

type PerSegment<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

struct FakeService {
    behavior: PerSegment<Behavior>,
    delay: PerSegment<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completion_order: Mutex<Vec<usize>>,
}

impl FakeService {
    fn new() -> Self {
        Self {
            behavior: Box::new(|_| Behavior::Describe),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completion_order: Mutex::new(Vec::new()),
        }
    }

    fn behaving(mut self, behavior: impl Fn(usize) -> Behavior + Send + Sync + 'static) -> Self {
        self.behavior = Box::new(behavior);
        self
    }

    fn delayed(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VisionService for FakeService {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ServiceError> {
        let segment = (request.images[0].timestamp / WINDOW).floor() as usize;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        tokio::time::sleep((self.delay)(segment)).await;

        match (self.behavior)(segment) {
            Behavior::Describe => {
                self.completion_order.lock().unwrap().push(segment);
                Ok(format!(
                    "segment {segment}: {} frames of a code editor",
                    request.images.len()
                ))
            }
            Behavior::Transient => Err(ServiceError::Server {
                status: 503,
                body: "overloaded".into(),
            }),
            Behavior::Fatal => Err(ServiceError::Auth {
                status: 401,
                body: "invalid key".into(),
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

fn config(worker_count: usize) -> PipelineConfig {
    PipelineConfig {
        worker_count,
        retry_max_attempts: 3,
        request_timeout_ms: 5_000,
        ..Default::default()
    }
}

fn pipeline(
    config: PipelineConfig,
    extractor: FakeExtractor,
    service: Arc<FakeService>,
) -> VisualPipeline {
    VisualPipeline::new(config, Arc::new(extractor), service)
        .unwrap()
        .with_sleeper(Arc::new(NoSleep))
}

fn video(duration: f64) -> VideoHandle {
    VideoHandle::new("/videos/lecture.mp4", duration)
}

fn transcript(spans: &[(f64, f64, &str)]) -> Transcript {
    Transcript {
        text: spans.iter().map(|(_, _, t)| *t).collect::<Vec<_>>().join(" "),
        language: "en".into(),
        segments: spans
            .iter()
            .map(|&(start, end, text)| TranscriptSegment {
                start,
                end,
                text: text.into(),
            })
            .collect(),
    }
}

fn assert_index_ordered(report: &PipelineReport, expected: usize) {
    let indices: Vec<_> = report.segments.iter().map(|s| s.index).collect();
    assert_eq!(indices, (0..expected).collect::<Vec<_>>());
}

#[tokio::test]
async fn report_is_index_ordered_when_segments_finish_in_reverse() {
    let service = Arc::new(
        FakeService::new().delayed(|segment| Duration::from_millis(20 * (6 - segment as u64))),
    );
    let pipeline = pipeline(config(6), FakeExtractor::healthy(), service.clone());

    let report = pipeline
        .analyze(&video(720.0), None, CancelToken::never())
        .await
        .unwrap();

    assert_index_ordered(&report, 6);
    assert_eq!(report.succeeded, 6);
    assert!(report.segments.iter().all(|s| s.frames_used == 3));
    assert!(report.segments[4].description.starts_with("segment 4:"));

    let order = service.completion_order.lock().unwrap().clone();
    assert_eq!(order.len(), 6);
    assert_ne!(order, (0..6).collect::<Vec<_>>());
}

#[tokio::test]
async fn never_more_than_worker_count_in_flight() {
    let service = Arc::new(FakeService::new().delayed(|_| Duration::from_millis(15)));
    let pipeline = pipeline(config(3), FakeExtractor::healthy(), service.clone());

    let report = pipeline
        .analyze(&video(12.0 * WINDOW), None, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 12);
    let max = service.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "observed {max} concurrent calls");
    assert!(max >= 1);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_transcript_or_fail() {
    let service = Arc::new(FakeService::new().behaving(|_| Behavior::Transient));
    let pipeline = pipeline(config(3), FakeExtractor::healthy(), service.clone());
    let transcript = transcript(&[(10.0, 20.0, "Let's open the terminal.")]);

    let result = pipeline
        .analyze(&video(240.0), Some(&transcript), CancelToken::never())
        .await;

    let report = match result {
        Err(VidlensError::ServiceUnavailable { report }) => report,
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    };
    assert_index_ordered(&report, 2);
    assert_eq!(service.calls(), 2 * 3);

    let first = &report.segments[0];
    assert_eq!(first.status, SegmentStatus::FallbackUsed);
    assert_eq!(
        first.description,
        "[Visual analysis unavailable for this segment] Let's open the terminal."
    );

    let second = &report.segments[1];
    assert_eq!(second.status, SegmentStatus::Failed);
    assert!(second.description.is_empty());
    assert!(matches!(
        second.error,
        Some(SegmentFailure::Remote {
            error: InferenceError::RetryExhausted { attempts: 3, .. }
        })
    ));
}

#[tokio::test]
async fn one_healthy_segment_keeps_the_run_successful() {
    let service = Arc::new(FakeService::new().behaving(|segment| {
        if segment == 0 {
            Behavior::Describe
        } else {
            Behavior::Transient
        }
    }));
    let pipeline = pipeline(config(2), FakeExtractor::healthy(), service.clone());

    let report = pipeline
        .analyze(&video(360.0), None, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(service.calls(), 1 + 2 * 3);
}

#[tokio::test]
async fn fatal_errors_fail_without_retry_or_fallback() {
    let service = Arc::new(FakeService::new().behaving(|segment| {
        if segment == 1 {
            Behavior::Fatal
        } else {
            Behavior::Describe
        }
    }));
    let pipeline = pipeline(config(3), FakeExtractor::healthy(), service.clone());
    let transcript = transcript(&[(130.0, 140.0, "this text is never used")]);

    let report = pipeline
        .analyze(&video(360.0), Some(&transcript), CancelToken::never())
        .await
        .unwrap();

    assert_eq!(service.calls(), 3);
    let failed = &report.segments[1];
    assert_eq!(failed.status, SegmentStatus::Failed);
    assert!(matches!(
        failed.error,
        Some(SegmentFailure::Remote {
            error: InferenceError::Fatal {
                source: ServiceError::Auth { status: 401, .. }
            }
        })
    ));
}

#[tokio::test]
async fn segment_without_frames_skips_the_service() {
    let mut config = config(3);
    config.frames_per_segment = 1;
    let service = Arc::new(FakeService::new());
    let pipeline = pipeline(config, FakeExtractor::failing_at(&[180.0]), service.clone());
    let transcript = transcript(&[(150.0, 160.0, "Now the slides.")]);

    let report = pipeline
        .analyze(&video(360.0), Some(&transcript), CancelToken::never())
        .await
        .unwrap();

    assert_eq!(service.calls(), 2);
    assert_eq!(report.succeeded, 2);
    let middle = &report.segments[1];
    assert_eq!(middle.status, SegmentStatus::FallbackUsed);
    assert_eq!(middle.frames_used, 0);
    assert_eq!(middle.error, Some(SegmentFailure::NoFrames { attempted: 1 }));
}

#[tokio::test]
async fn partial_frames_are_still_described() {
    let service = Arc::new(FakeService::new());
    let pipeline = pipeline(config(1), FakeExtractor::failing_at(&[60.0]), service.clone());

    let report = pipeline
        .analyze(&video(120.0), None, CancelToken::never())
        .await
        .unwrap();

    let only = &report.segments[0];
    assert_eq!(only.status, SegmentStatus::Success);
    assert_eq!(only.frames_used, 2);
    assert!(only.description.contains("2 frames"));
}

#[tokio::test]
async fn cancel_after_first_completion_fails_the_rest() {
    let service = Arc::new(FakeService::new().behaving(|segment| {
        if segment == 0 {
            Behavior::Describe
        } else {
            Behavior::Hang
        }
    }));
    let (handle, token) = cancellation();
    let pipeline = pipeline(config(1), FakeExtractor::healthy(), service.clone())
        .with_progress(move |completed, _total| {
            if completed == 1 {
                handle.cancel();
            }
        });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.analyze(&video(360.0), None, token),
    )
    .await
    .expect("pipeline should return after cancellation")
    .unwrap();

    assert_index_ordered(&report, 3);
    assert_eq!(report.segments[0].status, SegmentStatus::Success);
    for segment in &report.segments[1..] {
        assert_eq!(segment.status, SegmentStatus::Failed);
        assert_eq!(segment.error, Some(SegmentFailure::Cancelled));
    }
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn cancelled_before_start_does_no_work() {
    let service = Arc::new(FakeService::new());
    let pipeline = pipeline(config(3), FakeExtractor::healthy(), service.clone());
    let (handle, token) = cancellation();
    handle.cancel();

    let report = pipeline.analyze(&video(600.0), None, token).await.unwrap();

    assert_eq!(service.calls(), 0);
    assert_eq!(report.failed, 5);
    assert!(
        report
            .segments
            .iter()
            .all(|s| s.error == Some(SegmentFailure::Cancelled))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pre_cancelled_token_stops_work_on_a_threaded_runtime() {
    for _ in 0..50 {
        let service = Arc::new(FakeService::new());
        let pipeline = pipeline(config(8), FakeExtractor::healthy(), service.clone());
        let (handle, token) = cancellation();
        handle.cancel();

        let report = pipeline.analyze(&video(1200.0), None, token).await.unwrap();

        assert_eq!(service.calls(), 0);
        assert_eq!(report.failed, 10);
    }
}

#[tokio::test]
async fn serialized_decode_keeps_one_extraction_in_flight() {
    let extractor = Arc::new(CountingExtractor::default());
    let service = Arc::new(FakeService::new().delayed(|_| Duration::from_millis(40)));
    let config = PipelineConfig {
        serialize_decode: true,
        ..config(3)
    };
    let pipeline = VisualPipeline::new(config, extractor.clone(), service.clone())
        .unwrap()
        .with_sleeper(Arc::new(NoSleep));

    let report = pipeline
        .analyze(&video(720.0), None, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 6);
    assert_eq!(extractor.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(service.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn parallel_decode_overlaps_extractions() {
    let extractor = Arc::new(CountingExtractor::default());
    let service = Arc::new(FakeService::new());
    let pipeline = VisualPipeline::new(config(3), extractor.clone(), service)
        .unwrap()
        .with_sleeper(Arc::new(NoSleep));

    pipeline
        .analyze(&video(720.0), None, CancelToken::never())
        .await
        .unwrap();

    assert!(extractor.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn overall_timeout_returns_a_consistent_report() {
    let service = Arc::new(FakeService::new().behaving(|segment| {
        if segment == 0 {
            Behavior::Describe
        } else {
            Behavior::Hang
        }
    }));
    let mut config = config(1);
    config.overall_timeout_ms = Some(150);
    let pipeline = pipeline(config, FakeExtractor::healthy(), service.clone());

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.analyze(&video(360.0), None, CancelToken::never()),
    )
    .await
    .expect("deadline should stop the run")
    .unwrap();

    assert_index_ordered(&report, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.segments[2].error, Some(SegmentFailure::Cancelled));
}

#[tokio::test]
async fn invalid_duration_is_rejected_before_any_work() {
    let service = Arc::new(FakeService::new());
    let pipeline = pipeline(config(3), FakeExtractor::healthy(), service.clone());

    for duration in [0.0, -5.0, f64::NAN] {
        let result = pipeline
            .analyze(&video(duration), None, CancelToken::never())
            .await;
        assert!(matches!(result, Err(VidlensError::InvalidInput { .. })));
    }
    assert_eq!(service.calls(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let result = VisualPipeline::new(
        config(0),
        Arc::new(FakeExtractor::healthy()),
        Arc::new(FakeService::new()),
    );
    assert!(matches!(result, Err(VidlensError::InvalidInput { .. })));
}
