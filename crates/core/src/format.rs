use crate::{
    transcript::transcript_for_range,
    types::{PipelineReport, SegmentStatus, Transcript},
};

/// Format seconds as MM:SS, or H:MM:SS past the first hour
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// Format transcript segments with timestamps
pub fn format_transcript_with_timestamps(transcript: &Transcript) -> String {
    transcript
        .segments
        .iter()
        .map(|seg| format!("[{}] {}", format_timestamp(seg.start), seg.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-window blocks pairing spoken and visual evidence, for summarization.
pub fn build_full_context(report: &PipelineReport, transcript: Option<&Transcript>) -> String {
    report
        .segments
        .iter()
        .map(|seg| {
            let mut block = format!(
                "[{} - {}]\n",
                format_timestamp(seg.start_time),
                format_timestamp(seg.end_time)
            );
            if let Some(transcript) = transcript {
                let chunk = transcript_for_range(transcript, seg.start_time, seg.end_time);
                if !chunk.is_empty() {
                    block.push_str(&format!("Transcript: {}\n", chunk));
                }
            }
            if !seg.description.is_empty() {
                block.push_str(&format!("Visual: {}\n", seg.description));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_report_readable(report: &PipelineReport) -> String {
    let mut output = String::new();
    output.push_str("# Visual analysis\n\n");
    output.push_str(&format!(
        "**Segments:** {} | **Described:** {} | **Fallback:** {} | **Failed:** {}\n\n",
        report.len(),
        report.succeeded,
        report.fell_back,
        report.failed
    ));

    for seg in &report.segments {
        let start = format_timestamp(seg.start_time);
        let end = format_timestamp(seg.end_time);
        let marker = match seg.status {
            SegmentStatus::Success => "",
            SegmentStatus::FallbackUsed => " (transcript fallback)",
            SegmentStatus::Failed => " (failed)",
        };
        output.push_str(&format!("### [{}–{}]{}\n\n", start, end, marker));

        if !seg.description.is_empty() {
            output.push_str(&format!("{}\n\n", seg.description));
        }
        if let Some(error) = &seg.error
            && seg.status == SegmentStatus::Failed
        {
            output.push_str(&format!("_{}_\n\n", error));
        }
    }

    output
}
