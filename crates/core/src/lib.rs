pub mod aggregate;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod format;
pub mod frames;
pub mod inference;
pub mod pipeline;
pub mod planner;
pub mod pool;
pub mod prompt;
pub mod provider;
pub mod transcribe;
pub mod transcript;
pub mod types;

pub use aggregate::ResultAggregator;
pub use cache::{
    get_audio_path, get_cache_dir, get_report_path, get_root_cache_dir, get_transcript_path,
    load_report, save_report,
};
pub use cancel::{CancelHandle, CancelToken, cancellation};
pub use config::{PipelineConfig, RetryPolicy};
pub use error::{
    FrameError, InferenceError, Result, SegmentFailure, ServiceError, VidlensError,
};
pub use format::{
    build_full_context, format_report_readable, format_timestamp,
    format_transcript_with_timestamps,
};
pub use frames::{FfmpegFrameExtractor, FrameExtractor, SerializedExtractor, apply_decode_policy};
pub use inference::{
    ChatCompletionsService, InferenceClient, Sleeper, TokioSleeper, VisionRequest, VisionService,
};
pub use pipeline::VisualPipeline;
pub use planner::plan_segments;
pub use pool::{ProgressCallback, SegmentJob, SegmentWorkerPool};
pub use provider::{Provider, ProviderConfig, ProviderError};
pub use transcribe::{Transcriber, ensure_model, extract_audio, has_audio_stream};
pub use transcript::{load_transcript, save_transcript, search_transcript, transcript_for_range};
pub use types::{
    Frame, PipelineReport, Segment, SegmentResult, SegmentStatus, Transcript, TranscriptSegment,
    VideoHandle,
};

#[cfg(feature = "whisper")]
pub use transcribe::WhisperTranscriber;
