use crate::{format::format_timestamp, types::Segment};

static SEGMENT_DESCRIPTION_PROMPT: &str = r#"
Describe what you see in these frames in detail. Include:
- Key visual elements, people, text on screen
- Actions and changes between frames
- Any slides, diagrams, or presentations shown
Keep it factual and concise.
"#;

/// Instruction sent with the frames of `segment`.
pub fn segment_instruction(segment: &Segment) -> String {
    format!(
        "You are analyzing a segment of a video. This segment spans from {} to {}.\n{}",
        format_timestamp(segment.start_time),
        format_timestamp(segment.end_time),
        SEGMENT_DESCRIPTION_PROMPT.trim_start()
    )
}

/// Prompt context carrying what was said during the segment.
pub fn transcript_context(chunk: &str) -> Option<String> {
    let chunk = chunk.trim();
    (!chunk.is_empty()).then(|| format!("The audio transcript for this segment is:\n\"{chunk}\""))
}
