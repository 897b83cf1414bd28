use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};

use framegrab::{
    AnalysisError, AnalysisOutcome, CaptureBackend, FrameAnalyzer, FrameGrabber, GrabberError,
    ImageSequenceBackend, PipelineState, Settings, SharedFrame, SourceConfig, TestPatternBackend,
};

const DARK_THRESHOLD: f64 = 40.0;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML settings file, layered under FRAMEGRAB__* environment overrides.
    #[arg(long, env = "FRAMEGRAB_CONFIG")]
    config: Option<PathBuf>,
    /// Capture from the synthetic camera with this index.
    #[arg(long, conflicts_with = "file")]
    camera: Option<usize>,
    /// Play back an image file or a directory of images.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Capture rate override for cameras.
    #[arg(long)]
    fps: Option<f64>,
    /// Analyze at most one frame per interval.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Per-frame analysis deadline.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Number of synthetic cameras to expose.
    #[arg(long, default_value_t = 1)]
    cameras: usize,
}

#[derive(Debug, Serialize)]
struct BrightnessReport {
    frame: u64,
    mean_luma: f64,
    dark: bool,
}

/// Mean luma of each analyzed frame.
struct BrightnessAnalyzer;

#[async_trait]
impl FrameAnalyzer for BrightnessAnalyzer {
    type Output = BrightnessReport;

    async fn analyze(&self, frame: SharedFrame) -> Result<BrightnessReport, AnalysisError> {
        let index = frame.index();
        let mean_luma = tokio::task::spawn_blocking(move || {
            let luma = frame.image().to_luma8();
            let pixels = luma.as_raw();
            if pixels.is_empty() {
                return 0.0;
            }
            pixels.iter().map(|p| f64::from(*p)).sum::<f64>() / pixels.len() as f64
        })
        .await
        .map_err(|e| AnalysisError::new("Brightness", e.to_string()))?;

        Ok(BrightnessReport {
            frame: index,
            mean_luma,
            dark: mean_luma < DARK_THRESHOLD,
        })
    }
}

fn init_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn log_result(outcome: &AnalysisOutcome<BrightnessReport>) {
    match outcome {
        AnalysisOutcome::Completed(report) => match serde_json::to_string(report) {
            Ok(json) => info!("{}", json),
            Err(e) => warn!("Failed to serialize report: {}", e),
        },
        AnalysisOutcome::TimedOut => warn!("Analysis timed out"),
        AnalysisOutcome::Failed(e) => warn!("{}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), GrabberError> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    init_logging(&settings.logging.level);

    if let Some(ms) = args.timeout_ms {
        settings.grabber.analysis_timeout_ms = ms;
    }
    if let Some(ms) = args.interval_ms {
        settings.grabber.analysis_interval_ms = ms;
    }
    if let Some(path) = args.file {
        settings.source = SourceConfig::File { path };
    } else if let Some(index) = args.camera {
        settings.source = SourceConfig::Camera {
            index,
            fps: args.fps,
        };
    }

    let backend: Arc<dyn CaptureBackend> = match &settings.source {
        SourceConfig::Camera { .. } => Arc::new(TestPatternBackend::new(args.cameras)),
        SourceConfig::File { .. } => Arc::new(ImageSequenceBackend::new()),
    };
    let grabber = FrameGrabber::builder()
        .configuration(settings.grabber.clone())
        .shared_backend(backend)
        .analyzer(BrightnessAnalyzer)
        .build()?;

    grabber.on_result_available(|envelope| {
        info!(
            "Result for frame {} after {:?}",
            envelope.frame_index(),
            envelope.elapsed()
        );
        log_result(envelope.outcome());
    });

    match &settings.source {
        SourceConfig::Camera { index, fps } => {
            info!("{} camera(s) available", grabber.get_camera_count()?);
            grabber.start_camera(*index, *fps).await?;
        }
        SourceConfig::File { path } => grabber.start_file(path.clone()).await?,
    }

    let mut state = grabber.watch_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
        }
        _ = state.wait_for(|state| *state == PipelineState::Idle) => {
            info!("Source finished");
        }
    }
    grabber.stop().await;

    match serde_json::to_string(&grabber.stats()) {
        Ok(json) => info!("Run stats: {}", json),
        Err(e) => warn!("Failed to serialize stats: {}", e),
    }
    Ok(())
}
