//! Transcript windows used as fallback text and as prompt context.

use std::path::Path;

use crate::{
    error::Result,
    types::{Transcript, TranscriptSegment},
};

/// Marker put in front of transcript text standing in for a visual description.
pub const FALLBACK_PREFIX: &str = "[Visual analysis unavailable for this segment]";

/// Text of every transcript segment overlapping `[start, end)`, joined by spaces.
pub fn transcript_for_range(transcript: &Transcript, start: f64, end: f64) -> String {
    transcript
        .segments
        .iter()
        .filter(|seg| seg.end > start && seg.start < end)
        .map(|seg| seg.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The fallback description for a window, or `None` when nothing was said in it.
pub fn fallback_description(chunk: &str) -> Option<String> {
    let chunk = chunk.trim();
    (!chunk.is_empty()).then(|| format!("{FALLBACK_PREFIX} {chunk}"))
}

/// Case-insensitive search over transcript segments, in time order.
pub fn search_transcript<'a>(transcript: &'a Transcript, query: &str) -> Vec<&'a TranscriptSegment> {
    let query = query.to_lowercase();
    transcript
        .segments
        .iter()
        .filter(|seg| seg.text.to_lowercase().contains(&query))
        .collect()
}

pub async fn save_transcript(transcript: &Transcript, path: &Path) -> Result<()> {
    let json_content = serde_json::to_string_pretty(transcript)?;
    tokio::fs::write(path, json_content).await?;
    Ok(())
}

pub async fn load_transcript(path: &Path) -> Result<Transcript> {
    let json_content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json_content)?)
}
