// Bumpscope command line
// Runs the speed bump pipeline over a camera, a video or a directory of frames

use anyhow::{bail, Context};
use bumpscope_eye::camera::{FrameSource, ImageSequenceSource};
use bumpscope_eye::config::PipelineConfig;
use bumpscope_eye::models::{Detector, ReplayDetector};
use bumpscope_eye::pipeline::{PipelineOrchestrator, PipelineStats, StopHandle};
use bumpscope_eye::sink::{FrameSink, ImageDirSink};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bumpscope")]
#[command(about = "Speed bump detection with ground distance estimation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); reference defaults when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Read frames from a directory of images
    #[arg(long, conflicts_with_all = ["camera", "video"])]
    frames: Option<PathBuf>,

    /// Capture device index (opencv feature)
    #[arg(long, conflicts_with = "video")]
    camera: Option<u32>,

    /// Read frames from a video file (opencv feature)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Write annotated frames as PNGs into this directory
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Only write processed frames to --output
    #[arg(long, requires = "output")]
    processed_only: bool,

    /// Show frames in a window; press q to quit (opencv feature)
    #[arg(long)]
    window: bool,

    /// Replay detections from a JSON file (one array per processed frame)
    #[arg(long, conflicts_with = "model")]
    replay: Option<PathBuf>,

    /// YOLO ONNX model (onnx feature); overrides detection.model_path
    #[arg(long)]
    model: Option<PathBuf>,

    /// Square network input size for --model
    #[arg(long, default_value = "640")]
    input_size: u32,

    /// Override process_every_n_frames
    #[arg(long)]
    every_n: Option<u32>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(every_n) = cli.every_n {
        config.process_every_n_frames = every_n;
    }
    config.validate()?;

    let source = open_source(&cli, &config)?;
    let sink = open_sink(&cli)?;
    let detector = build_detector(&cli, &config)?;

    let stop = StopHandle::new();
    let mut pipeline = PipelineOrchestrator::from_config(&config, source, sink, detector)?
        .with_stop_handle(stop.clone());

    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        stop.stop();
    });

    let stats = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .context("Pipeline thread panicked")??;

    report(&stats);
    Ok(())
}

fn open_source(cli: &Cli, config: &PipelineConfig) -> anyhow::Result<Box<dyn FrameSource>> {
    if let Some(dir) = &cli.frames {
        return Ok(Box::new(ImageSequenceSource::open(dir)?));
    }

    #[cfg(feature = "opencv")]
    {
        use bumpscope_eye::camera::{CameraCapture, CaptureTarget};

        let target = match (&cli.video, cli.camera) {
            (Some(path), _) => CaptureTarget::File(path.clone()),
            (None, Some(id)) => CaptureTarget::Device(id),
            (None, None) => CaptureTarget::Device(config.camera.camera_id),
        };
        Ok(Box::new(CameraCapture::open(target, &config.camera)?))
    }

    #[cfg(not(feature = "opencv"))]
    {
        let _ = config;
        if cli.camera.is_some() || cli.video.is_some() {
            bail!("Camera and video input need the `opencv` feature");
        }
        bail!("No input given; pass --frames <DIR>")
    }
}

fn open_sink(cli: &Cli) -> anyhow::Result<Box<dyn FrameSink>> {
    if cli.window {
        #[cfg(feature = "opencv")]
        {
            return Ok(Box::new(bumpscope_eye::sink::WindowSink::open("bumpscope")?));
        }
        #[cfg(not(feature = "opencv"))]
        bail!("--window needs the `opencv` feature");
    }

    match &cli.output {
        Some(dir) => Ok(Box::new(
            ImageDirSink::create(dir)?.processed_only(cli.processed_only),
        )),
        None => bail!("No output given; pass --output <DIR> or --window"),
    }
}

fn build_detector(cli: &Cli, config: &PipelineConfig) -> anyhow::Result<Box<dyn Detector>> {
    if let Some(path) = &cli.replay {
        return Ok(Box::new(ReplayDetector::load(path)?));
    }

    let model_path = cli.model.clone().or_else(|| config.detection.model_path.clone());
    match model_path {
        #[cfg(feature = "onnx")]
        Some(path) => Ok(Box::new(bumpscope_eye::models::YoloDetector::new(
            &path,
            (cli.input_size, cli.input_size),
            config.detection.class_names.clone(),
        )?)),
        #[cfg(not(feature = "onnx"))]
        Some(path) => bail!(
            "Model {} needs the `onnx` feature",
            path.display()
        ),
        None => {
            warn!("No detector configured; frames are only undistorted");
            Ok(Box::new(ReplayDetector::new(Vec::new())))
        }
    }
}

fn report(stats: &PipelineStats) {
    info!(
        "Stopped ({:?}) after {} frames: {} processed, {} passed through, {} dropped",
        stats.stop_reason,
        stats.frames_captured,
        stats.frames_processed,
        stats.frames_passed_through,
        stats.frames_dropped
    );
    info!(
        "{} detections, {} without distance, {} detector failures",
        stats.detections, stats.degenerate_projections, stats.detector_failures
    );
    info!(
        "Average frame time {:?}, {} frames over budget",
        stats.average_processing_time(),
        stats.frames_over_budget
    );
}
