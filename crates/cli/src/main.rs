use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;

use aerosar_core::pipeline::infrastructure::frame_worker::{FrameWorker, WorkerEvent};
use aerosar_core::pipeline::pipeline_logger::{PipelineLogger, StdoutPipelineLogger};
use aerosar_core::shared::config::{
    FusionMode, MotionAlgorithm, PipelineConfig, RenderShape,
};
use aerosar_core::video::domain::frame_source::FrameSource;
use aerosar_core::video::domain::video_writer::VideoWriter;
use aerosar_core::video::infrastructure::ffmpeg_source::FfmpegFileSource;
use aerosar_core::video::infrastructure::ffmpeg_writer::FfmpegWriter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_THROTTLE_FRAMES: usize = 30;

/// Streaming motion and color-anomaly detection over aerial search video.
#[derive(Parser)]
#[command(name = "aerosar")]
struct Cli {
    /// Input video file.
    input: PathBuf,

    /// Write the annotated video here.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Load a full pipeline configuration from a JSON file; flags below
    /// override individual fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable motion detection.
    #[arg(long)]
    no_motion: bool,

    /// Motion algorithm: frame-diff, mog2 or knn.
    #[arg(long)]
    motion_algorithm: Option<String>,

    /// Motion difference threshold (1-255).
    #[arg(long)]
    motion_threshold: Option<u8>,

    /// Enable color-anomaly (quantization) detection.
    #[arg(long)]
    color: bool,

    /// Histogram rarity percentile (0-100).
    #[arg(long)]
    rarity_percentile: Option<f64>,

    /// Fusion mode: union, intersection, color-priority or motion-priority.
    #[arg(long)]
    fusion_mode: Option<String>,

    /// Temporal voting window in frames (2-30).
    #[arg(long)]
    temporal_window: Option<usize>,

    /// Confirmations required within the window (1-30).
    #[arg(long)]
    temporal_threshold: Option<usize>,

    /// Processing resolution, capped to the source's native size.
    #[arg(long)]
    processing_width: Option<u32>,
    #[arg(long)]
    processing_height: Option<u32>,

    /// Overlay shape: box, circle, dot or off.
    #[arg(long)]
    render_shape: Option<String>,

    /// Draw text labels next to detections.
    #[arg(long)]
    render_text: bool,

    /// Draw exact contours of detected regions.
    #[arg(long)]
    render_contours: bool,

    /// Limit processing rate; skipped frames reuse the last detections.
    #[arg(long)]
    target_fps: Option<f64>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let mut source = FfmpegFileSource::new();
    let metadata = source.open(&cli.input)?;
    log::info!(
        "Opened {} ({}x{} @ {:.1} fps, {} frames)",
        cli.input.display(),
        metadata.width,
        metadata.height,
        metadata.fps,
        metadata.total_frames
    );

    let mut writer: Option<FfmpegWriter> = match &cli.output {
        Some(path) => {
            let mut w = FfmpegWriter::new();
            w.open(path, &metadata)?;
            Some(w)
        }
        None => None,
    };

    let mut worker = FrameWorker::spawn(config, None);
    let mut logger = StdoutPipelineLogger::new(PROGRESS_THROTTLE_FRAMES);

    let total_frames = metadata.total_frames;
    let mut submitted = 0usize;
    let mut received = 0usize;
    let mut total_detections = 0usize;

    while let Some(result) = source.next_frame() {
        let (frame, timestamp) = result?;

        // File mode processes every frame: when the single in-flight
        // slot is busy, wait for a result instead of dropping
        loop {
            if worker.submit(frame.clone(), timestamp)? {
                submitted += 1;
                break;
            }
            if let Some(event) = worker.recv_event_timeout(EVENT_TIMEOUT) {
                received += 1;
                handle_event(event, &mut logger, &mut writer, &mut total_detections, total_frames, received)?;
            }
        }

        while let Some(event) = worker.poll_event() {
            received += 1;
            handle_event(event, &mut logger, &mut writer, &mut total_detections, total_frames, received)?;
        }
    }
    source.close();

    while received < submitted {
        match worker.recv_event_timeout(EVENT_TIMEOUT) {
            Some(event) => {
                received += 1;
                handle_event(event, &mut logger, &mut writer, &mut total_detections, total_frames, received)?;
            }
            None => break,
        }
    }

    if let Err(e) = worker.shutdown(SHUTDOWN_TIMEOUT) {
        log::error!("worker shutdown: {e}");
    }

    if let Some(writer) = writer.as_mut() {
        writer.close()?;
    }

    logger.summary();
    log::info!("{total_detections} detections across {received} frames");
    if let Some(output) = &cli.output {
        log::info!("Annotated video written to {}", output.display());
    }

    Ok(())
}

fn handle_event(
    event: WorkerEvent,
    logger: &mut StdoutPipelineLogger,
    writer: &mut Option<FfmpegWriter>,
    total_detections: &mut usize,
    total_frames: usize,
    received: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    match event {
        WorkerEvent::Processed {
            frame,
            detections,
            timings,
            camera_moving,
        } => {
            logger.frame_timings(&timings);
            logger.metric("detections", detections.len() as f64);
            logger.progress(received, total_frames);
            *total_detections += detections.len();

            if camera_moving {
                log::debug!("frame {}: camera movement, detection gated", frame.index());
            }
            for d in &detections {
                log::debug!(
                    "frame {}: {} at ({}, {}) area {:.0} confidence {:.2}",
                    frame.index(),
                    d.kind.label(),
                    d.centroid.0,
                    d.centroid.1,
                    d.area,
                    d.confidence
                );
            }

            if let Some(w) = writer.as_mut() {
                w.write(&frame)?;
            }
        }
        WorkerEvent::Error { message } => {
            log::warn!("frame failed: {message}");
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    if cli.no_motion {
        config.enable_motion = false;
    }
    if cli.color {
        config.enable_color_quantization = true;
    }
    if let Some(algorithm) = &cli.motion_algorithm {
        config.motion_algorithm = parse_motion_algorithm(algorithm)?;
    }
    if let Some(threshold) = cli.motion_threshold {
        config.motion_threshold = threshold;
    }
    if let Some(percentile) = cli.rarity_percentile {
        config.color_rarity_percentile = percentile;
    }
    if let Some(mode) = &cli.fusion_mode {
        config.fusion_mode = parse_fusion_mode(mode)?;
    }
    if let Some(window) = cli.temporal_window {
        config.temporal_window_frames = window;
    }
    if let Some(threshold) = cli.temporal_threshold {
        config.temporal_threshold_frames = threshold;
    }
    if let Some(width) = cli.processing_width {
        config.processing_width = width;
    }
    if let Some(height) = cli.processing_height {
        config.processing_height = height;
    }
    if let Some(shape) = &cli.render_shape {
        config.render_shape = parse_render_shape(shape)?;
    }
    if cli.render_text {
        config.render_text = true;
    }
    if cli.render_contours {
        config.render_contours = true;
    }
    if let Some(fps) = cli.target_fps {
        config.target_fps = fps;
    }

    Ok(config.normalized())
}

fn load_config(path: &Path) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn parse_motion_algorithm(value: &str) -> Result<MotionAlgorithm, String> {
    match value {
        "frame-diff" => Ok(MotionAlgorithm::FrameDiff),
        "mog2" => Ok(MotionAlgorithm::Mog2),
        "knn" => Ok(MotionAlgorithm::Knn),
        other => Err(format!(
            "unknown motion algorithm '{other}' (expected frame-diff, mog2 or knn)"
        )),
    }
}

fn parse_fusion_mode(value: &str) -> Result<FusionMode, String> {
    match value {
        "union" => Ok(FusionMode::Union),
        "intersection" => Ok(FusionMode::Intersection),
        "color-priority" => Ok(FusionMode::ColorPriority),
        "motion-priority" => Ok(FusionMode::MotionPriority),
        other => Err(format!(
            "unknown fusion mode '{other}' (expected union, intersection, color-priority or motion-priority)"
        )),
    }
}

fn parse_render_shape(value: &str) -> Result<RenderShape, String> {
    match value {
        "box" => Ok(RenderShape::Box),
        "circle" => Ok(RenderShape::Circle),
        "dot" => Ok(RenderShape::Dot),
        "off" => Ok(RenderShape::Off),
        other => Err(format!(
            "unknown render shape '{other}' (expected box, circle, dot or off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_motion_algorithm() {
        assert_eq!(
            parse_motion_algorithm("mog2").unwrap(),
            MotionAlgorithm::Mog2
        );
        assert!(parse_motion_algorithm("optical-flow").is_err());
    }

    #[test]
    fn test_parse_fusion_mode() {
        assert_eq!(
            parse_fusion_mode("color-priority").unwrap(),
            FusionMode::ColorPriority
        );
        assert!(parse_fusion_mode("both").is_err());
    }

    #[test]
    fn test_parse_render_shape() {
        assert_eq!(parse_render_shape("off").unwrap(), RenderShape::Off);
        assert!(parse_render_shape("triangle").is_err());
    }

    #[test]
    fn test_flag_overrides_apply() {
        let cli = Cli::parse_from([
            "aerosar",
            "input.mp4",
            "--no-motion",
            "--color",
            "--temporal-window",
            "7",
            "--temporal-threshold",
            "4",
            "--render-shape",
            "box",
        ]);
        let config = build_config(&cli).unwrap();
        assert!(!config.enable_motion);
        assert!(config.enable_color_quantization);
        assert_eq!(config.temporal_window_frames, 7);
        assert_eq!(config.temporal_threshold_frames, 4);
        assert_eq!(config.render_shape, RenderShape::Box);
    }

    #[test]
    fn test_invalid_combination_is_clamped_not_fatal() {
        let cli = Cli::parse_from([
            "aerosar",
            "input.mp4",
            "--temporal-window",
            "5",
            "--temporal-threshold",
            "20",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.temporal_threshold_frames, 5);
    }
}
