use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vidlens_core::{
    ChatCompletionsService, FfmpegFrameExtractor, PipelineConfig, PipelineReport, Provider,
    Transcript, VideoHandle, VidlensError, VisualPipeline, cancellation, format_report_readable,
    get_cache_dir, get_report_path, get_transcript_path, load_report, load_transcript,
    save_report,
};

/// Write one progress line to the step terminal.
macro_rules! step {
    ($term:expr, $($arg:tt)*) => {
        $term.write_line(&format!($($arg)*))?
    };
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Nvidia,
    Openai,
    Gemini,
    Grok,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Nvidia => Provider::Nvidia,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
            CliProvider::Grok => Provider::Grok,
        }
    }
}

#[derive(Parser)]
#[command(name = "vidlens")]
#[command(about = "Describe what happens on screen in a video, segment by segment")]
struct Cli {
    /// Path to a local video file
    video: PathBuf,

    /// Vision provider
    #[arg(short, long, default_value = "nvidia")]
    provider: CliProvider,

    /// Transcript JSON used for prompt context and fallback descriptions
    #[arg(short, long)]
    transcript: Option<PathBuf>,

    /// Pipeline configuration JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parallel segment workers (1-8)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Overall deadline for the visual analysis, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Force re-processing even if cached files exist
    #[arg(short, long)]
    force: bool,

    /// Print the report as JSON instead of markdown
    #[arg(long)]
    json: bool,

    /// Whisper model file name, downloaded on first use
    #[cfg(feature = "whisper")]
    #[arg(long, default_value = vidlens_core::transcribe::DEFAULT_MODEL_NAME)]
    model: String,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

fn create_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn create_progress_bar(len: usize, msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

async fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path).await?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides();

    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if let Some(secs) = cli.timeout {
        config.overall_timeout_ms = Some(secs.saturating_mul(1000));
    }
    config.validate()?;
    Ok(config)
}

/// Progress lines go to stderr when stdout carries the JSON report.
fn step_term(json: bool) -> Term {
    if json {
        Term::stderr()
    } else {
        Term::stdout()
    }
}

fn print_transcript_step(term: &Term, transcript: &Transcript, note: &str) -> Result<()> {
    let duration_mins = transcript
        .segments
        .last()
        .map(|s| s.end / 60.0)
        .unwrap_or(0.0);
    step!(
        term,
        "{} Transcript: {:.1} min, {} {}",
        style("✓").green().bold(),
        duration_mins,
        style(&transcript.language).yellow(),
        style(note).dim()
    );
    Ok(())
}

async fn obtain_transcript(
    term: &Term,
    cli: &Cli,
    video: &VideoHandle,
    cache_dir: &Path,
) -> Result<Option<Transcript>> {
    if let Some(path) = &cli.transcript {
        let transcript = load_transcript(path).await?;
        print_transcript_step(term, &transcript, "(provided)")?;
        return Ok(Some(transcript));
    }

    let transcript_path = get_transcript_path(cache_dir);
    if !cli.force && transcript_path.exists() {
        let transcript = load_transcript(&transcript_path).await?;
        print_transcript_step(term, &transcript, "(cached)")?;
        return Ok(Some(transcript));
    }

    transcribe_video(term, cli, video, cache_dir, &transcript_path).await
}

#[cfg(feature = "whisper")]
async fn transcribe_video(
    term: &Term,
    cli: &Cli,
    video: &VideoHandle,
    cache_dir: &Path,
    transcript_path: &Path,
) -> Result<Option<Transcript>> {
    use vidlens_core::{
        Transcriber, WhisperTranscriber, ensure_model, extract_audio, get_audio_path,
        get_root_cache_dir, has_audio_stream, transcript::save_transcript,
    };

    if !has_audio_stream(video.path()).await? {
        step!(
            term,
            "{} No audio track {}",
            style("!").yellow().bold(),
            style("(continuing without transcript)").dim()
        );
        return Ok(None);
    }

    let step_start = Instant::now();
    let audio_file = get_audio_path(cache_dir);
    if cli.force || !audio_file.exists() {
        let spinner = create_spinner("Extracting audio...")?;
        extract_audio(video.path(), &audio_file).await?;
        spinner.finish_with_message(format!(
            "{} Audio extracted {}",
            style("✓").green().bold(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        ));
    }

    let spinner = create_spinner("Checking model...")?;
    let model_path = ensure_model(&get_root_cache_dir(), &cli.model).await?;
    spinner.finish_and_clear();

    let step_start = Instant::now();
    let spinner = create_spinner("Transcribing with Whisper...")?;
    let transcript = WhisperTranscriber::new(model_path)
        .transcribe(&audio_file)
        .await?;
    save_transcript(&transcript, transcript_path).await?;
    spinner.finish_and_clear();
    print_transcript_step(
        term,
        &transcript,
        &format!("[{}]", format_duration(step_start.elapsed())),
    )?;

    Ok(Some(transcript))
}

#[cfg(not(feature = "whisper"))]
async fn transcribe_video(
    term: &Term,
    _cli: &Cli,
    _video: &VideoHandle,
    _cache_dir: &Path,
    _transcript_path: &Path,
) -> Result<Option<Transcript>> {
    step!(
        term,
        "{} No transcript {}",
        style("!").yellow().bold(),
        style("(pass --transcript or build with --features whisper)").dim()
    );
    Ok(None)
}

#[cfg(feature = "whisper")]
extern "C" fn whisper_log_callback(
    _level: u32,
    _message: *const std::ffi::c_char,
    _user_data: *mut std::ffi::c_void,
) {
    // silent
}

fn render_report(report: &PipelineReport, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(report)?)
    } else {
        Ok(format_report_readable(report))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let provider: Provider = cli.provider.clone().into();

    #[cfg(feature = "whisper")]
    unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    }

    // Validate API key and config early
    let service = match ChatCompletionsService::from_provider(provider) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };
    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    let term = step_term(cli.json);
    step!(
        term,
        "\n{}  {}\n",
        style("vidlens").cyan().bold(),
        style("Visual Analyzer").dim()
    );

    let total_start = Instant::now();

    // Step 1: Probe
    let video = VideoHandle::open(&cli.video).await?;
    step!(
        term,
        "{} Probed: {} {}",
        style("✓").green().bold(),
        style(cli.video.display()).dim(),
        style(format!("({:.1} min)", video.duration() / 60.0)).dim()
    );

    let cache_dir = get_cache_dir(&cli.video);
    fs::create_dir_all(&cache_dir).await?;

    step!(term, "{}", style("─".repeat(60)).dim());

    // Step 2: Transcript (provided, cached, or transcribed)
    let transcript = obtain_transcript(&term, &cli, &video, &cache_dir).await?;

    // Step 3: Visual analysis (reuse only complete cached reports)
    let report_path = get_report_path(&cache_dir, &provider);
    let cached = if !cli.force && report_path.exists() {
        load_report(&report_path)
            .await
            .ok()
            .filter(|r| r.failed == 0 && r.fell_back == 0)
    } else {
        None
    };

    let (report, unavailable) = match cached {
        Some(report) => {
            step!(
                term,
                "{} Visual analysis ({}) {}",
                style("✓").green().bold(),
                provider.name(),
                style("(cached)").dim()
            );
            (report, false)
        }
        None => {
            let step_start = Instant::now();
            let (cancel_handle, cancel_token) = cancellation();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling visual analysis");
                    cancel_handle.cancel();
                }
            });

            let extractor = FfmpegFrameExtractor::from_config(&config);
            let pipeline = VisualPipeline::new(
                config,
                std::sync::Arc::new(extractor),
                std::sync::Arc::new(service),
            )?;
            let segments = pipeline.plan(&video)?.len();
            let progress = create_progress_bar(
                segments,
                &format!("Analyzing frames with {}...", provider.name()),
            )?;
            let bar = progress.clone();
            let pipeline = pipeline.with_progress(move |completed, total| {
                bar.set_length(total as u64);
                bar.set_position(completed as u64);
            });

            let outcome = pipeline
                .analyze(&video, transcript.as_ref(), cancel_token)
                .await;
            progress.finish_and_clear();

            let (report, unavailable) = match outcome {
                Ok(report) => (report, false),
                Err(VidlensError::ServiceUnavailable { report }) => (*report, true),
                Err(e) => return Err(e.into()),
            };

            save_report(&report, &report_path).await?;
            step!(
                term,
                "{} Visual analysis ({}): {} described, {} fallback, {} failed {}",
                style("✓").green().bold(),
                provider.name(),
                style(report.succeeded).green(),
                style(report.fell_back).yellow(),
                style(report.failed).red(),
                style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
            );
            (report, unavailable)
        }
    };

    step!(
        term,
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );

    step!(
        term,
        "\n{} {}\n",
        style("Saved:").dim(),
        style(report_path.display()).cyan()
    );
    step!(term, "{}", style("─".repeat(60)).dim());

    println!("{}", render_report(&report, cli.json)?);

    if unavailable {
        eprintln!(
            "{} {}",
            style("Error:").red().bold(),
            VidlensError::ServiceUnavailable {
                report: Box::new(report)
            }
        );
        std::process::exit(1);
    }

    Ok(())
}
