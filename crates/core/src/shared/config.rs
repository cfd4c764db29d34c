use serde::{Deserialize, Serialize};

/// Motion detection algorithm selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAlgorithm {
    /// Absolute difference against the previous frame.
    FrameDiff,
    /// Adaptive per-pixel Gaussian background model (static cameras).
    #[default]
    Mog2,
    /// Per-pixel sample-buffer background model (busy scenes).
    Knn,
}

/// Policy for combining motion and color detections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Everything from both detectors, unchanged.
    #[default]
    Union,
    /// Only pairs both detectors agree on, merged.
    Intersection,
    /// All color detections, plus motion that corroborates one.
    ColorPriority,
    /// All motion detections, plus color that corroborates one.
    MotionPriority,
}

/// Overlay shape drawn per detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderShape {
    Box,
    #[default]
    Circle,
    Dot,
    Off,
}

/// Immutable per-frame snapshot of every tunable parameter.
///
/// The UI mutates a copy and hands it to the worker between frames; a
/// frame in flight always sees the snapshot captured when its processing
/// began. Out-of-range values coming from live sliders are clamped by
/// [`PipelineConfig::normalized`], never treated as fatal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Processing resolution (capped to the source's native size, never upscaled)
    pub processing_width: u32,
    pub processing_height: u32,
    pub render_at_processing_resolution: bool,

    // Frame-rate limiting (0 = process every frame)
    pub target_fps: f64,

    // Motion detection
    pub enable_motion: bool,
    pub motion_algorithm: MotionAlgorithm,
    pub motion_threshold: u8,
    pub min_detection_area: f64,
    pub max_detection_area: f64,
    pub blur_kernel_size: usize,
    pub enable_morphology: bool,
    pub morphology_kernel_size: usize,
    pub persistence_frames: usize,
    pub persistence_threshold: usize,
    pub bg_history: u32,
    pub bg_var_threshold: f64,
    pub bg_detect_shadows: bool,
    pub pause_on_camera_movement: bool,
    pub camera_movement_threshold: f64,

    // Color anomaly detection
    pub enable_color_quantization: bool,
    pub color_quantization_bits: u8,
    pub color_rarity_percentile: f64,
    pub color_min_detection_area: f64,
    pub color_max_detection_area: f64,
    pub enable_hue_expansion: bool,
    pub hue_expansion_range: u8,
    pub enable_color_exclusion: bool,
    /// Half-scale hue ranges (0-179); `min > max` wraps around 179/0.
    pub excluded_hue_ranges: Vec<(f64, f64)>,

    // Fusion and temporal voting
    pub enable_fusion: bool,
    pub fusion_mode: FusionMode,
    pub fusion_match_distance: f64,
    pub enable_temporal_voting: bool,
    pub temporal_window_frames: usize,
    pub temporal_threshold_frames: usize,

    // Geometric post-filtering
    pub enable_aspect_ratio_filter: bool,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub enable_detection_clustering: bool,
    pub clustering_distance: f64,

    // Rendering
    pub show_detections: bool,
    pub render_shape: RenderShape,
    pub render_text: bool,
    pub render_contours: bool,
    pub use_detection_color_for_rendering: bool,
    pub max_detections_to_render: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing_width: 1280,
            processing_height: 720,
            render_at_processing_resolution: false,
            target_fps: 0.0,
            enable_motion: true,
            motion_algorithm: MotionAlgorithm::default(),
            motion_threshold: 25,
            min_detection_area: 100.0,
            max_detection_area: 50_000.0,
            blur_kernel_size: 5,
            enable_morphology: true,
            morphology_kernel_size: 3,
            persistence_frames: 3,
            persistence_threshold: 2,
            bg_history: 100,
            bg_var_threshold: 25.0,
            bg_detect_shadows: false,
            pause_on_camera_movement: true,
            camera_movement_threshold: 0.15,
            enable_color_quantization: false,
            color_quantization_bits: 4,
            color_rarity_percentile: 30.0,
            color_min_detection_area: 15.0,
            color_max_detection_area: 50_000.0,
            enable_hue_expansion: false,
            hue_expansion_range: 5,
            enable_color_exclusion: false,
            excluded_hue_ranges: Vec::new(),
            enable_fusion: true,
            fusion_mode: FusionMode::default(),
            fusion_match_distance: 20.0,
            enable_temporal_voting: true,
            temporal_window_frames: 3,
            temporal_threshold_frames: 2,
            enable_aspect_ratio_filter: true,
            min_aspect_ratio: 0.2,
            max_aspect_ratio: 5.0,
            enable_detection_clustering: false,
            clustering_distance: 50.0,
            show_detections: true,
            render_shape: RenderShape::default(),
            render_text: false,
            render_contours: false,
            use_detection_color_for_rendering: false,
            max_detections_to_render: 20,
        }
    }
}

impl PipelineConfig {
    /// Clamp every parameter into its documented range.
    ///
    /// Values arrive from live UI sliders which can transiently produce
    /// invalid combinations (threshold dragged above window, even kernel
    /// sizes), so violations are normalized instead of rejected.
    pub fn normalized(mut self) -> Self {
        self.processing_width = self.processing_width.max(1);
        self.processing_height = self.processing_height.max(1);
        self.target_fps = self.target_fps.max(0.0);

        self.motion_threshold = self.motion_threshold.max(1);
        self.blur_kernel_size = clamp_odd(self.blur_kernel_size, 1, 21);
        self.morphology_kernel_size = clamp_odd(self.morphology_kernel_size, 1, 21);
        self.min_detection_area = self.min_detection_area.max(0.0);
        self.max_detection_area = self.max_detection_area.max(self.min_detection_area);

        self.persistence_frames = self.persistence_frames.clamp(2, 30);
        self.persistence_threshold = self
            .persistence_threshold
            .clamp(1, self.persistence_frames);
        self.bg_history = self.bg_history.clamp(10, 500);
        self.bg_var_threshold = self.bg_var_threshold.clamp(1.0, 100.0);
        self.camera_movement_threshold = self.camera_movement_threshold.clamp(0.0, 1.0);

        self.color_quantization_bits = self.color_quantization_bits.clamp(3, 8);
        self.color_rarity_percentile = self.color_rarity_percentile.clamp(0.0, 100.0);
        self.color_min_detection_area = self.color_min_detection_area.max(0.0);
        self.color_max_detection_area = self
            .color_max_detection_area
            .max(self.color_min_detection_area);
        self.hue_expansion_range = self.hue_expansion_range.min(30);

        self.fusion_match_distance = self.fusion_match_distance.max(0.0);
        self.temporal_window_frames = self.temporal_window_frames.clamp(2, 30);
        self.temporal_threshold_frames = self
            .temporal_threshold_frames
            .clamp(1, self.temporal_window_frames);

        self.min_aspect_ratio = self.min_aspect_ratio.max(0.0);
        self.max_aspect_ratio = self.max_aspect_ratio.max(self.min_aspect_ratio);
        self.clustering_distance = self.clustering_distance.clamp(0.0, 500.0);
        self.max_detections_to_render = self.max_detections_to_render.min(1000);

        self
    }
}

/// Convert user-selected hue bucket centers (full-scale degrees, 20°-spaced)
/// into half-scale exclusion ranges with a ±10° tolerance.
///
/// Ranges that cross 0° come back with `min > max` and are interpreted as
/// wraparound by the exclusion filter.
pub fn excluded_ranges_from_hue_buckets(bucket_degrees: &[f64]) -> Vec<(f64, f64)> {
    const TOLERANCE_DEG: f64 = 10.0;
    bucket_degrees
        .iter()
        .map(|&center| {
            let lo = (center - TOLERANCE_DEG).rem_euclid(360.0) / 2.0;
            let hi = (center + TOLERANCE_DEG).rem_euclid(360.0) / 2.0;
            (lo, hi)
        })
        .collect()
}

fn clamp_odd(value: usize, min: usize, max: usize) -> usize {
    let v = value.clamp(min, max);
    if v % 2 == 0 {
        v - 1
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_default_is_already_normalized() {
        let config = PipelineConfig::default();
        assert_eq!(config.clone().normalized(), config);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(4, 3)]
    #[case(5, 5)]
    #[case(22, 21)]
    #[case(100, 21)]
    fn test_kernel_sizes_clamped_to_odd_range(#[case] input: usize, #[case] expected: usize) {
        let config = PipelineConfig {
            blur_kernel_size: input,
            morphology_kernel_size: input,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.blur_kernel_size, expected);
        assert_eq!(config.morphology_kernel_size, expected);
    }

    #[test]
    fn test_temporal_threshold_clamped_to_window() {
        let config = PipelineConfig {
            temporal_window_frames: 5,
            temporal_threshold_frames: 9,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.temporal_threshold_frames, 5);
    }

    #[test]
    fn test_persistence_threshold_clamped_to_window() {
        let config = PipelineConfig {
            persistence_frames: 40,
            persistence_threshold: 35,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.persistence_frames, 30);
        assert_eq!(config.persistence_threshold, 30);
    }

    #[test]
    fn test_quantization_bits_clamped() {
        let config = PipelineConfig {
            color_quantization_bits: 1,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.color_quantization_bits, 3);

        let config = PipelineConfig {
            color_quantization_bits: 12,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.color_quantization_bits, 8);
    }

    #[test]
    fn test_max_area_raised_to_min_area() {
        let config = PipelineConfig {
            min_detection_area: 500.0,
            max_detection_area: 100.0,
            ..Default::default()
        }
        .normalized();
        assert_relative_eq!(config.max_detection_area, 500.0);
    }

    #[test]
    fn test_camera_movement_threshold_clamped_to_fraction() {
        let config = PipelineConfig {
            camera_movement_threshold: 3.0,
            ..Default::default()
        }
        .normalized();
        assert_relative_eq!(config.camera_movement_threshold, 1.0);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PipelineConfig {
            enable_color_quantization: true,
            fusion_mode: FusionMode::ColorPriority,
            motion_algorithm: MotionAlgorithm::FrameDiff,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_config_json_uses_defaults() {
        let back: PipelineConfig =
            serde_json::from_str(r#"{"enable_motion": false, "motion_threshold": 40}"#).unwrap();
        assert!(!back.enable_motion);
        assert_eq!(back.motion_threshold, 40);
        assert_eq!(back.temporal_window_frames, 3);
    }

    // ── Hue buckets ──────────────────────────────────────────────────

    #[test]
    fn test_hue_bucket_center_maps_to_half_scale_range() {
        let ranges = excluded_ranges_from_hue_buckets(&[120.0]);
        assert_eq!(ranges.len(), 1);
        assert_relative_eq!(ranges[0].0, 55.0); // (120-10)/2
        assert_relative_eq!(ranges[0].1, 65.0); // (120+10)/2
    }

    #[test]
    fn test_hue_bucket_wraps_around_zero() {
        let ranges = excluded_ranges_from_hue_buckets(&[0.0]);
        // 350°..10° full scale → 175..5 half scale, min > max flags wraparound
        assert_relative_eq!(ranges[0].0, 175.0);
        assert_relative_eq!(ranges[0].1, 5.0);
        assert!(ranges[0].0 > ranges[0].1);
    }
}
