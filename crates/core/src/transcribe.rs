//! Speech-to-text collaborator.
//!
//! The pipeline only consumes a [`Transcript`]; producing one goes through
//! the [`Transcriber`] capability so callers can plug in any backend. With the
//! `whisper` feature a local whisper.cpp model is available.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, process::Command};
use tracing::info;

use crate::{
    cache::get_model_dir,
    error::{Result, VidlensError},
    types::Transcript,
};

pub const DEFAULT_MODEL_NAME: &str = "ggml-medium-q5_0.bin";

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript>;
}

/// Extract a 16 kHz mono WAV track from a video
pub async fn extract_audio(video_path: &Path, audio_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(audio_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(VidlensError::AudioExtractionFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Whether ffprobe finds at least one audio stream in the file
pub async fn has_audio_stream(video_path: &Path) -> Result<bool> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("a")
        .arg("-show_entries")
        .arg("stream=codec_type")
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

    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Download the ggml model into the model cache unless it is already there
pub async fn ensure_model(root_cache_dir: &Path, model_name: &str) -> Result<PathBuf> {
    let download_url = format!(
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
        model_name
    );
    let model_dir = get_model_dir(root_cache_dir);
    fs::create_dir_all(&model_dir).await?;

    let model_path = model_dir.join(model_name);
    if model_path.exists() {
        return Ok(model_path);
    }

    info!(url = %download_url, "downloading whisper model");
    let partial_path = model_path.with_extension("part");
    let output = Command::new("curl")
        .arg("-fL")
        .arg(&download_url)
        .arg("-o")
        .arg(&partial_path)
        .output()
        .await?;

    if !output.status.success() {
        let _ = fs::remove_file(&partial_path).await;
        return Err(VidlensError::ModelDownloadFailed {
            url: download_url,
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    fs::rename(&partial_path, &model_path).await?;

    Ok(model_path)
}

#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;

#[cfg(feature = "whisper")]
mod whisper {
    use std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{Arc, LazyLock, Mutex, PoisonError},
    };

    use async_trait::async_trait;
    use tracing::{debug, info};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use super::Transcriber;
    use crate::{
        error::{Result, VidlensError},
        types::{Transcript, TranscriptSegment},
    };

    /// Loaded models, kept for the lifetime of the process.
    static MODELS: LazyLock<Mutex<HashMap<PathBuf, Arc<WhisperContext>>>> =
        LazyLock::new(Default::default);

    pub struct WhisperTranscriber {
        model_path: PathBuf,
        use_gpu: bool,
        language: Option<String>,
    }

    impl WhisperTranscriber {
        pub fn new(model_path: impl Into<PathBuf>) -> Self {
            Self {
                model_path: model_path.into(),
                use_gpu: cfg!(feature = "cuda"),
                language: None,
            }
        }

        pub fn with_gpu(mut self, use_gpu: bool) -> Self {
            self.use_gpu = use_gpu;
            self
        }

        /// Force a spoken language instead of auto-detection.
        pub fn with_language(mut self, language: impl Into<String>) -> Self {
            self.language = Some(language.into());
            self
        }
    }

    fn failed(audio_path: &Path, reason: impl ToString) -> VidlensError {
        VidlensError::TranscriptFailed {
            audio_path: audio_path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn load_model(model_path: &Path, use_gpu: bool) -> std::result::Result<Arc<WhisperContext>, String> {
        let mut models = MODELS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ctx) = models.get(model_path) {
            return Ok(ctx.clone());
        }

        info!(model = %model_path.display(), use_gpu, "loading whisper model");
        let ctx_params = WhisperContextParameters {
            use_gpu,
            flash_attn: use_gpu,
            ..Default::default()
        };
        let model_path_str = model_path
            .to_str()
            .ok_or_else(|| format!("model path is not UTF-8: {}", model_path.display()))?;
        let ctx = WhisperContext::new_with_params(model_path_str, ctx_params)
            .map_err(|e| format!("failed to load model: {e}"))?;

        let ctx = Arc::new(ctx);
        models.insert(model_path.to_path_buf(), ctx.clone());
        Ok(ctx)
    }

    fn run(
        audio_path: &Path,
        model_path: &Path,
        use_gpu: bool,
        language: Option<&str>,
    ) -> Result<Transcript> {
        let mut reader = hound::WavReader::open(audio_path).map_err(|e| failed(audio_path, e))?;
        let samples = reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| failed(audio_path, e))?;

        let ctx = load_model(model_path, use_gpu).map_err(|e| failed(audio_path, e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
        params.set_language(language);

        let mut state = ctx.create_state().map_err(|e| failed(audio_path, e))?;
        state
            .full(params, &samples)
            .map_err(|e| failed(audio_path, e))?;

        let mut text = String::new();
        let mut segments = Vec::new();

        for segment in state.as_iter() {
            let seg_text = match segment.to_str() {
                Ok(s) => s,
                Err(_) => continue,
            };
            segments.push(TranscriptSegment {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text: seg_text.to_string(),
            });
            text.push_str(seg_text);
        }

        let language_index = state.full_lang_id_from_state();
        let language = whisper_rs::get_lang_str(language_index);
        debug!(segments = segments.len(), ?language, "transcription finished");

        Ok(Transcript {
            language: language.unwrap_or("Unknown").to_string(),
            segments,
            text,
        })
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
            let path = audio_path.to_path_buf();
            let model_path = self.model_path.clone();
            let use_gpu = self.use_gpu;
            let language = self.language.clone();

            tokio::task::spawn_blocking(move || {
                run(&path, &model_path, use_gpu, language.as_deref())
            })
            .await
            .map_err(|e| failed(audio_path, e))?
        }
    }
}
