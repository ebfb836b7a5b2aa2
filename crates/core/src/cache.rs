use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::{error::Result, provider::Provider, types::PipelineReport};

/// Get the cache directory for a given video file
pub fn get_cache_dir(video_path: &Path) -> PathBuf {
    get_cache_dir_in(&get_root_cache_dir(), video_path)
}

/// Like [`get_cache_dir`], under an explicit root.
pub fn get_cache_dir_in(root: &Path, video_path: &Path) -> PathBuf {
    let canonical = std::fs::canonicalize(video_path).unwrap_or_else(|_| video_path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    let path_hash = hasher.finish();

    root.join(path_hash.to_string())
}

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vidlens")
}

pub fn get_model_dir(root_cache_dir: &Path) -> PathBuf {
    root_cache_dir.join("models")
}

/// Get the path for a cached audio file
pub fn get_audio_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("audio.wav")
}

/// Get the path for a cached transcript file
pub fn get_transcript_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("transcript.json")
}

/// Get the path for a cached visual report (provider aware)
pub fn get_report_path(cache_dir: &Path, provider: &Provider) -> PathBuf {
    cache_dir.join(format!("visual_report_{}.json", provider.slug()))
}

/// Load a report from a cached file
pub async fn load_report(path: &Path) -> Result<PipelineReport> {
    let json_content = fs::read_to_string(path).await?;
    let report: PipelineReport = serde_json::from_str(&json_content)?;
    Ok(report)
}

/// Save a report to a file, creating parent directories
pub async fn save_report(report: &PipelineReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let pretty_json = serde_json::to_string_pretty(report)?;
    fs::write(path, &pretty_json).await?;
    Ok(())
}
