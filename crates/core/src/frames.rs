//! Frame extraction.
//!
//! ffmpeg seeks and decodes a single still; resizing and JPEG encoding happen
//! in-process so the bound and quality are exact.

use std::{path::Path, process::Stdio, sync::Arc};

use async_trait::async_trait;
use image::{GenericImageView, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tokio::{process::Command, sync::Mutex};
use tracing::debug;

use crate::{
    config::PipelineConfig,
    error::{FrameError, Result, VidlensError},
    types::{Frame, VideoHandle},
};

/// Distance kept from the end of the stream so a sample at `duration` still decodes.
const END_GUARD_SECONDS: f64 = 0.1;

/// Tolerance for timestamps computed from floating point windows.
const RANGE_EPSILON: f64 = 1e-6;

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(
        &self,
        video: &VideoHandle,
        timestamp: f64,
    ) -> std::result::Result<Frame, FrameError>;
}

/// Funnels every extraction of the wrapped extractor through one lock, for
/// decoders that cannot seek the same source concurrently.
pub struct SerializedExtractor<E: ?Sized> {
    inner: Arc<E>,
    decode_lock: Mutex<()>,
}

impl<E: FrameExtractor + ?Sized> SerializedExtractor<E> {
    pub fn new(inner: Arc<E>) -> Self {
        Self {
            inner,
            decode_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<E: FrameExtractor + ?Sized> FrameExtractor for SerializedExtractor<E> {
    async fn extract(
        &self,
        video: &VideoHandle,
        timestamp: f64,
    ) -> std::result::Result<Frame, FrameError> {
        let _guard = self.decode_lock.lock().await;
        self.inner.extract(video, timestamp).await
    }
}

/// Wrap `extractor` in a [`SerializedExtractor`] when the config asks for it.
pub fn apply_decode_policy(
    extractor: Arc<dyn FrameExtractor>,
    config: &PipelineConfig,
) -> Arc<dyn FrameExtractor> {
    if config.serialize_decode {
        Arc::new(SerializedExtractor::new(extractor))
    } else {
        extractor
    }
}

pub struct FfmpegFrameExtractor {
    max_dimension: u32,
    quality: u8,
}

impl FfmpegFrameExtractor {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension,
            quality,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_frame_dimension_px, config.jpeg_quality)
    }

    async fn decode_png(
        &self,
        path: &Path,
        seek: f64,
        timestamp: f64,
    ) -> std::result::Result<Vec<u8>, FrameError> {
        let output = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{seek:.3}"))
            .arg("-i")
            .arg(path)
            .arg("-frames:v")
            .arg("1")
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg("png")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(FrameError::DecodeFailed {
                timestamp,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract(
        &self,
        video: &VideoHandle,
        timestamp: f64,
    ) -> std::result::Result<Frame, FrameError> {
        let duration = video.duration();
        if !timestamp.is_finite() || timestamp < 0.0 || timestamp > duration + RANGE_EPSILON {
            return Err(FrameError::OutOfRange {
                timestamp,
                duration,
            });
        }

        let seek = timestamp.min(duration - END_GUARD_SECONDS).max(0.0);
        let raw = self.decode_png(video.path(), seek, timestamp).await?;

        let (max_dimension, quality) = (self.max_dimension, self.quality);
        let frame = tokio::task::spawn_blocking(move || {
            downscale_and_encode(&raw, timestamp, max_dimension, quality)
        })
        .await
        .map_err(|e| FrameError::DecodeFailed {
            timestamp,
            reason: e.to_string(),
        })??;

        debug!(
            timestamp,
            width = frame.width,
            height = frame.height,
            bytes = frame.data.len(),
            "extracted frame"
        );
        Ok(frame)
    }
}

/// Shrink `raw` so its longer side is at most `max_dimension` and encode it as JPEG.
pub fn downscale_and_encode(
    raw: &[u8],
    timestamp: f64,
    max_dimension: u32,
    quality: u8,
) -> std::result::Result<Frame, FrameError> {
    let image = image::load_from_memory(raw)?;
    let (width, height) = image.dimensions();

    let image = if width.max(height) > max_dimension {
        image.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        image
    };

    let rgb = image.to_rgb8();
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality).encode_image(&rgb)?;

    Ok(Frame {
        timestamp,
        data,
        width: rgb.width(),
        height: rgb.height(),
        quality,
    })
}

/// Read the container duration with ffprobe.
pub async fn probe_duration(video_path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("csv=p=0")
        .arg(video_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(VidlensError::ProbeFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout_str = String::from_utf8_lossy(&output.stdout);
    stdout_str
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| VidlensError::ProbeFailed {
            video_path: video_path.to_path_buf(),
            reason: format!("unusable duration {:?}", stdout_str.trim()),
        })
}

impl VideoHandle {
    /// Probe `path` and build a handle with its duration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let duration = probe_duration(path).await?;
        Ok(VideoHandle::new(path, duration))
    }
}
