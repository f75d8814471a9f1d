use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use live_detect_core::capture::domain::video_source::SharedVideoSource;
use live_detect_core::capture::infrastructure::synthetic_source::SyntheticVideoSource;
use live_detect_core::inference::infrastructure::backend_factory::BackendMode;
use live_detect_core::inference::infrastructure::remote_backend::FallbackStrategy;
use live_detect_core::pipeline::detection_session::DetectionSession;
use live_detect_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use live_detect_core::pipeline::session_config::{DeliveryOrder, MockDetections, SessionConfig};
use live_detect_core::shared::detection::DetectionBatch;

/// Run live object detection on a video stream for a fixed duration.
#[derive(Parser)]
#[command(name = "live-detect")]
struct Cli {
    /// Base configuration file (JSON). Defaults to the user config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file before running.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Video file to play as the live stream (requires the `ffmpeg` feature).
    /// Without it a synthetic test pattern is used.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Restart the input file when it ends.
    #[arg(long = "loop")]
    looping: bool,

    /// Synthetic stream width.
    #[arg(long, default_value = "640")]
    source_width: u32,

    /// Synthetic stream height.
    #[arg(long, default_value = "480")]
    source_height: u32,

    /// Seconds to run before stopping.
    #[arg(long, default_value = "10")]
    duration: f64,

    /// Backend: local or remote.
    #[arg(long)]
    mode: Option<BackendMode>,

    /// Frames sampled per second.
    #[arg(long)]
    fps: Option<f64>,

    /// Downsampled frame width sent to the backend.
    #[arg(long)]
    width: Option<u32>,

    /// Downsampled frame height sent to the backend.
    #[arg(long)]
    height: Option<u32>,

    /// Remote detection endpoint URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Remote request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JPEG quality for remote uploads (1-100).
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Local ONNX model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Local detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Remote fallback: placeholder or empty.
    #[arg(long)]
    fallback: Option<FallbackStrategy>,

    /// Mock detections: off, until_first_result or always.
    #[arg(long)]
    mock: Option<MockDetections>,

    /// Result ordering: latest_wins or drop_out_of_order.
    #[arg(long)]
    ordering: Option<DeliveryOrder>,

    /// Print each batch as a JSON line on stdout.
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Seconds from `--duration` as a non-zero, representable `Duration`.
fn run_duration(secs: f64) -> Result<Duration, String> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(format!(
            "--duration must be a positive, finite number of seconds, got {secs}"
        )),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let duration = run_duration(cli.duration)?;

    let config = build_config(&cli)?;
    config.validate()?;
    if let Some(path) = &cli.save_config {
        config.save(path)?;
        log::info!("Configuration written to {}", path.display());
    }

    let source = open_source(&cli)?;
    let mut session = DetectionSession::new(config)
        .with_logger(Box::new(StdoutPipelineLogger::default()));
    let batches = session.subscribe();

    session.start(source)?;
    let deadline = Instant::now()
        .checked_add(duration)
        .ok_or("--duration is too long")?;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match batches.recv_timeout(remaining) {
            Ok(batch) => report(&batch, cli.json)?,
            Err(_) => break,
        }
    }
    session.stop();

    let stats = session.stats();
    log::info!(
        "Sampled {}, submitted {}, dropped {} busy / {} not ready, {} fallbacks",
        stats.sampled,
        stats.submitted,
        stats.dropped_busy,
        stats.dropped_not_ready,
        stats.fallbacks
    );
    session.log_summary();
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::load_or_default(),
    };

    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(fps) = cli.fps {
        config.target_fps = fps;
    }
    if let Some(width) = cli.width {
        config.frame_width = width;
    }
    if let Some(height) = cli.height {
        config.frame_height = height;
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint_url = endpoint.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.remote_timeout_ms = timeout_ms;
    }
    if let Some(quality) = cli.jpeg_quality {
        config.jpeg_quality = quality;
    }
    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }
    if let Some(confidence) = cli.confidence {
        config.confidence = confidence;
    }
    if let Some(fallback) = cli.fallback {
        config.fallback = fallback;
    }
    if let Some(mock) = cli.mock {
        config.mock_detections = mock;
    }
    if let Some(ordering) = cli.ordering {
        config.ordering = ordering;
    }
    Ok(config)
}

fn open_source(cli: &Cli) -> Result<SharedVideoSource, Box<dyn std::error::Error>> {
    match &cli.input {
        Some(path) => open_file_source(path, cli.looping),
        None => {
            log::info!(
                "Using synthetic {}x{} stream",
                cli.source_width,
                cli.source_height
            );
            Ok(Arc::new(SyntheticVideoSource::new(
                cli.source_width,
                cli.source_height,
            )))
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn open_file_source(
    path: &std::path::Path,
    looping: bool,
) -> Result<SharedVideoSource, Box<dyn std::error::Error>> {
    use live_detect_core::capture::infrastructure::ffmpeg_source::FfmpegVideoSource;

    Ok(Arc::new(FfmpegVideoSource::open(path, looping)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_file_source(
    path: &std::path::Path,
    _looping: bool,
) -> Result<SharedVideoSource, Box<dyn std::error::Error>> {
    Err(format!(
        "cannot play {}: built without the `ffmpeg` feature",
        path.display()
    )
    .into())
}

fn report(batch: &DetectionBatch, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(batch)?);
        return Ok(());
    }
    let labels: Vec<String> = batch
        .detections()
        .iter()
        .map(|d| format!("{} {:.2}", d.label(), d.score()))
        .collect();
    log::info!(
        "Frame {} [{:?}] {:.1}ms: {}",
        batch.frame_id(),
        batch.provenance(),
        batch.processing_time_ms(),
        if labels.is_empty() {
            "nothing".to_string()
        } else {
            labels.join(", ")
        }
    );
    Ok(())
}
