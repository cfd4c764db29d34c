use std::time::Instant;

use crate::detection::domain::camera_guard::CameraMovementGuard;
use crate::detection::domain::fusion::fuse;
use crate::detection::domain::geometric_filter;
use crate::detection::domain::temporal_voting::TemporalVotingFilter;
use crate::detection::infrastructure::color_anomaly_detector::ColorAnomalyDetector;
use crate::detection::infrastructure::motion_detector::MotionDetector;
use crate::imaging::gaussian::{gaussian_kernel_1d, separable_gaussian_blur_with_kernel};
use crate::imaging::gray::bgr_to_gray;
use crate::imaging::resize::resize_bilinear;
use crate::pipeline::metrics::StageTimings;
use crate::rendering::detection_renderer::DetectionRenderer;
use crate::shared::config::PipelineConfig;
use crate::shared::detection::Detection;
use crate::shared::error::PipelineError;
use crate::shared::frame::Frame;

/// Everything one frame produces: the (possibly annotated) frame for
/// display/recording, the surviving detections in original-resolution
/// coordinates, the stage timing breakdown, and whether the camera-
/// movement gate was engaged.
pub struct PipelineOutput {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub timings: StageTimings,
    pub camera_moving: bool,
}

/// Owns and wires every detection stage; `process_frame` is the single
/// entry point.
///
/// All state is thread-affined to whichever thread owns the pipeline —
/// in production that is the worker thread, which constructs it from a
/// config snapshot and never shares it.
pub struct DetectionPipeline {
    config: PipelineConfig,
    motion: MotionDetector,
    color: ColorAnomalyDetector,
    temporal: TemporalVotingFilter,
    guard: CameraMovementGuard,
    renderer: DetectionRenderer,
    blur_kernel: Vec<f32>,
    blur_kernel_size: usize,
    blur_temp: Vec<f32>,
    last_detections: Vec<Detection>,
    last_processed_at: Option<Instant>,
}

impl DetectionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let config = config.normalized();
        let motion = MotionDetector::new(&config);
        Self {
            blur_kernel: gaussian_kernel_1d(config.blur_kernel_size),
            blur_kernel_size: config.blur_kernel_size,
            config,
            motion,
            color: ColorAnomalyDetector::new(),
            temporal: TemporalVotingFilter::new(),
            guard: CameraMovementGuard::new(),
            renderer: DetectionRenderer::new(),
            blur_temp: Vec::new(),
            last_detections: Vec::new(),
            last_processed_at: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Swap in a new configuration between frames. The frame currently
    /// being processed (if any) already holds its own snapshot.
    pub fn reconfigure(&mut self, config: PipelineConfig) {
        self.config = config.normalized();
    }

    /// Forget all cross-frame state: background models, persistence
    /// votes, temporal buckets, camera baseline, and the re-render cache.
    /// Called when the stream source changes.
    pub fn reset(&mut self) {
        self.motion.reset();
        self.temporal.reset();
        self.guard.reset();
        self.last_detections.clear();
        self.last_processed_at = None;
    }

    /// Run the full detect → fuse → filter → render pipeline on one frame.
    ///
    /// Invalid frames are rejected up front; everything past that point
    /// degrades to "no detections" rather than erroring, so one bad frame
    /// can never stall the stream.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        timestamp: f64,
    ) -> Result<PipelineOutput, PipelineError> {
        if frame.is_empty() {
            return Err(PipelineError::InvalidFrame(format!(
                "{}x{} with {} bytes",
                frame.width(),
                frame.height(),
                frame.data().len()
            )));
        }

        let overall_start = Instant::now();
        let config = self.config.clone();
        let mut timings = StageTimings::default();

        // Frame-rate limiting: skip early, but re-render the previous
        // detections onto the new frame so the display stays continuous
        if config.target_fps > 0.0 {
            let interval = 1.0 / config.target_fps;
            if let Some(last) = self.last_processed_at {
                if last.elapsed().as_secs_f64() < interval {
                    let mut annotated = frame.clone();
                    self.renderer
                        .render(&mut annotated, &self.last_detections, &config, 1.0);
                    timings.was_skipped = true;
                    timings.total_ms = ms_since(overall_start);
                    return Ok(PipelineOutput {
                        frame: annotated,
                        detections: self.last_detections.clone(),
                        timings,
                        camera_moving: false,
                    });
                }
            }
            self.last_processed_at = Some(Instant::now());
        }

        // Preprocess: cap to processing resolution (never upscale),
        // grayscale, Gaussian blur
        let stage_start = Instant::now();
        let original_res = (frame.width(), frame.height());
        let scale_factor = compute_scale(original_res, &config);
        let processing = if scale_factor < 1.0 {
            resize_bilinear(
                frame,
                ((frame.width() as f64 * scale_factor) as u32).max(1),
                ((frame.height() as f64 * scale_factor) as u32).max(1),
            )
        } else {
            frame.clone()
        };
        let processing_res = (processing.width(), processing.height());

        let mut gray = bgr_to_gray(&processing);
        if config.blur_kernel_size > 1 {
            if self.blur_kernel_size != config.blur_kernel_size {
                self.blur_kernel = gaussian_kernel_1d(config.blur_kernel_size);
                self.blur_kernel_size = config.blur_kernel_size;
            }
            separable_gaussian_blur_with_kernel(
                &mut gray.data,
                gray.width,
                gray.height,
                &self.blur_kernel,
                &mut self.blur_temp,
            );
        }
        timings.preprocess_ms = ms_since(stage_start);

        let camera_moving = self.guard.check(&gray, &config);

        // Detector stages; detections are rescaled to original-resolution
        // coordinates immediately so every downstream stage works in one
        // coordinate space
        let stage_start = Instant::now();
        let motion_detections = if config.enable_motion && !camera_moving {
            self.motion
                .detect(&gray, &config, timestamp)
                .into_iter()
                .map(|d| d.scaled_to_original(scale_factor, processing_res, original_res))
                .collect()
        } else {
            Vec::new()
        };
        timings.motion_ms = ms_since(stage_start);

        let stage_start = Instant::now();
        let color_detections = if config.enable_color_quantization && !camera_moving {
            self.color
                .detect(&processing, &config, timestamp)
                .into_iter()
                .map(|d| d.scaled_to_original(scale_factor, processing_res, original_res))
                .collect()
        } else {
            Vec::new()
        };
        timings.color_ms = ms_since(stage_start);

        let stage_start = Instant::now();
        let fused = fuse(motion_detections, color_detections, &config);
        timings.fusion_ms = ms_since(stage_start);

        // Temporal voting always sees the frame, even an empty one, so
        // buckets age out during gated or quiet stretches
        let stage_start = Instant::now();
        let voted = self.temporal.apply(fused, &config);
        let filtered = geometric_filter::apply(voted, &config);
        timings.filter_ms = ms_since(stage_start);

        let stage_start = Instant::now();
        let render_at_processing =
            config.render_at_processing_resolution && scale_factor < 1.0;
        let (mut annotated, render_scale) = if render_at_processing {
            (processing, scale_factor)
        } else {
            (frame.clone(), 1.0)
        };
        self.renderer
            .render(&mut annotated, &filtered, &config, render_scale);
        if render_at_processing {
            annotated = resize_bilinear(&annotated, original_res.0, original_res.1);
        }
        timings.render_ms = ms_since(stage_start);

        timings.total_ms = ms_since(overall_start);
        self.last_detections = filtered.clone();

        Ok(PipelineOutput {
            frame: annotated,
            detections: filtered,
            timings,
            camera_moving,
        })
    }
}

/// Downscale factor from native to processing resolution, aspect
/// preserving; 1.0 when the source is already at or below the target.
fn compute_scale(original: (u32, u32), config: &PipelineConfig) -> f64 {
    let (w, h) = original;
    if w > config.processing_width || h > config.processing_height {
        (config.processing_width as f64 / w as f64)
            .min(config.processing_height as f64 / h as f64)
    } else {
        1.0
    }
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::config::{MotionAlgorithm, RenderShape};

    const W: u32 = 128;
    const H: u32 = 128;

    fn green_frame(index: usize) -> Frame {
        let mut data = Vec::with_capacity((W * H * 3) as usize);
        for _ in 0..W * H {
            data.extend_from_slice(&[40, 180, 40]);
        }
        Frame::new(data, W, H, 3, index)
    }

    /// Green frame with a 20x20 red square centered at (63.5, 63.5).
    fn frame_with_red_square(index: usize) -> Frame {
        let mut frame = green_frame(index);
        let data = frame.data_mut();
        for y in 54u32..74 {
            for x in 54u32..74 {
                let offset = ((y * W + x) * 3) as usize;
                data[offset] = 20;
                data[offset + 1] = 20;
                data[offset + 2] = 230;
            }
        }
        frame
    }

    fn color_only_config() -> PipelineConfig {
        PipelineConfig {
            enable_motion: false,
            enable_color_quantization: true,
            color_rarity_percentile: 30.0,
            enable_temporal_voting: true,
            temporal_window_frames: 5,
            temporal_threshold_frames: 3,
            enable_detection_clustering: false,
            render_shape: RenderShape::Off,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
        let empty = Frame::new(Vec::new(), 0, 0, 3, 0);
        assert!(matches!(
            pipeline.process_frame(&empty, 0.0),
            Err(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_red_square_scenario_end_to_end() {
        // 100-frame stream; the square is visible in frames 10..=40.
        // With window=5 and threshold=3 the first confirmation can come
        // no earlier than frame 12 and the last no later than frame 42.
        let mut pipeline = DetectionPipeline::new(color_only_config());

        let mut first_confirmed = None;
        let mut last_confirmed = None;
        for i in 0..100 {
            let frame = if (10..=40).contains(&i) {
                frame_with_red_square(i)
            } else {
                green_frame(i)
            };
            let output = pipeline.process_frame(&frame, i as f64 / 30.0).unwrap();
            if !output.detections.is_empty() {
                if first_confirmed.is_none() {
                    first_confirmed = Some(i);
                }
                last_confirmed = Some(i);
                // Centroid stays pinned to the square's center
                let (cx, cy) = output.detections[0].centroid;
                assert!((cx - 63).abs() <= 1, "frame {i}: centroid x {cx}");
                assert!((cy - 63).abs() <= 1, "frame {i}: centroid y {cy}");
            }
        }

        let first = first_confirmed.expect("square was never confirmed");
        let last = last_confirmed.unwrap();
        assert!(first >= 12, "confirmed too early: frame {first}");
        assert!(first <= 14, "confirmed too late: frame {first}");
        assert!(last <= 42, "still confirmed at frame {last}");
        assert!(last >= 40, "lost the square early: frame {last}");
    }

    #[test]
    fn test_camera_movement_gates_all_output() {
        let mut pipeline = DetectionPipeline::new(PipelineConfig {
            enable_motion: true,
            motion_algorithm: MotionAlgorithm::FrameDiff,
            enable_temporal_voting: false,
            persistence_frames: 2,
            persistence_threshold: 1,
            min_detection_area: 10.0,
            pause_on_camera_movement: true,
            camera_movement_threshold: 0.15,
            render_shape: RenderShape::Off,
            ..Default::default()
        });

        pipeline.process_frame(&green_frame(0), 0.0).unwrap();
        // Whole frame changes: looks like panning, not object motion
        let black = Frame::new(vec![0; (W * H * 3) as usize], W, H, 3, 1);
        let output = pipeline.process_frame(&black, 0.1).unwrap();
        assert!(output.camera_moving);
        assert!(output.detections.is_empty());
    }

    #[test]
    fn test_resolution_is_capped_never_upscaled() {
        // Requesting 3840x2160 against a 128x128 source: processing
        // stays at the native resolution
        let mut pipeline = DetectionPipeline::new(PipelineConfig {
            processing_width: 3840,
            processing_height: 2160,
            enable_temporal_voting: false,
            ..color_only_config()
        });
        pipeline.process_frame(&green_frame(0), 0.0).unwrap();
        let output = pipeline
            .process_frame(&frame_with_red_square(1), 0.1)
            .unwrap();
        let d = &output.detections[0];
        assert_eq!(d.metadata.processing_resolution, Some((W, H)));
        assert_eq!(d.metadata.original_resolution, Some((W, H)));
    }

    #[test]
    fn test_downscaled_detections_map_back_to_original() {
        // Resampling smears the square's border into many sparse bins, so
        // a generous percentile (the absolute 5% cap still applies) keeps
        // the square itself rare
        let mut pipeline = DetectionPipeline::new(PipelineConfig {
            processing_width: 64,
            processing_height: 64,
            color_rarity_percentile: 90.0,
            enable_temporal_voting: false,
            ..color_only_config()
        });
        let output = pipeline
            .process_frame(&frame_with_red_square(0), 0.0)
            .unwrap();
        assert!(!output.detections.is_empty());
        let d = &output.detections[0];
        assert_eq!(d.metadata.processing_resolution, Some((64, 64)));
        assert_eq!(d.metadata.original_resolution, Some((W, H)));
        // Geometry is reported in original-resolution pixels
        assert!((d.centroid.0 - 63).abs() <= 3, "centroid {:?}", d.centroid);
        assert!(d.bbox.width >= 14 && d.bbox.width <= 28, "bbox {:?}", d.bbox);
    }

    #[test]
    fn test_frame_rate_limiting_reuses_last_detections() {
        let mut pipeline = DetectionPipeline::new(PipelineConfig {
            target_fps: 0.001, // one frame per ~17 minutes
            enable_temporal_voting: false,
            ..color_only_config()
        });
        let first = pipeline
            .process_frame(&frame_with_red_square(0), 0.0)
            .unwrap();
        assert!(!first.timings.was_skipped);
        assert_eq!(first.detections.len(), 1);

        let second = pipeline.process_frame(&green_frame(1), 0.033).unwrap();
        assert!(second.timings.was_skipped);
        // Previous detections carried over for visual continuity
        assert_eq!(second.detections.len(), 1);
    }

    #[test]
    fn test_reset_clears_temporal_confirmation() {
        let mut pipeline = DetectionPipeline::new(color_only_config());
        for i in 0..5 {
            pipeline
                .process_frame(&frame_with_red_square(i), i as f64)
                .unwrap();
        }
        pipeline.reset();
        // Confirmation starts over: two observations are not enough
        let mut confirmed = 0;
        for i in 0..2 {
            let output = pipeline
                .process_frame(&frame_with_red_square(i), i as f64)
                .unwrap();
            confirmed += output.detections.len();
        }
        assert_eq!(confirmed, 0);
    }

    #[test]
    fn test_reconfigure_applies_from_next_frame() {
        let mut pipeline = DetectionPipeline::new(color_only_config());
        pipeline.reconfigure(PipelineConfig {
            enable_color_quantization: false,
            ..color_only_config()
        });
        for i in 0..5 {
            let output = pipeline
                .process_frame(&frame_with_red_square(i), i as f64)
                .unwrap();
            assert!(output.detections.is_empty());
        }
    }

    #[test]
    fn test_config_is_normalized_on_construction() {
        let pipeline = DetectionPipeline::new(PipelineConfig {
            temporal_window_frames: 5,
            temporal_threshold_frames: 99,
            blur_kernel_size: 8,
            ..Default::default()
        });
        assert_eq!(pipeline.config().temporal_threshold_frames, 5);
        assert_eq!(pipeline.config().blur_kernel_size, 7);
    }

    #[test]
    fn test_annotated_frame_keeps_original_dimensions() {
        let mut pipeline = DetectionPipeline::new(PipelineConfig {
            processing_width: 64,
            processing_height: 64,
            render_at_processing_resolution: true,
            enable_temporal_voting: false,
            render_shape: RenderShape::Box,
            ..color_only_config()
        });
        let output = pipeline
            .process_frame(&frame_with_red_square(0), 0.0)
            .unwrap();
        assert_eq!(output.frame.width(), W);
        assert_eq!(output.frame.height(), H);
    }
}
