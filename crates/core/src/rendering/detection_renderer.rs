use crate::imaging::hsv::{bgr_to_hsv, hsv_to_bgr};
use crate::rendering::draw::{self, Color};
use crate::shared::config::{PipelineConfig, RenderShape};
use crate::shared::detection::{Detection, DetectionKind};
use crate::shared::frame::Frame;

const STROKE: i32 = 2;

/// Draws detection overlays onto a frame for display and recording.
///
/// Detections arrive in original-resolution coordinates; `render_scale`
/// maps them onto the target frame when it is the processing-resolution
/// copy. When a cap is configured, detections are kept by descending
/// confidence and the overflow is dropped.
pub struct DetectionRenderer;

impl DetectionRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        frame: &mut Frame,
        detections: &[Detection],
        config: &PipelineConfig,
        render_scale: f64,
    ) {
        if !config.show_detections
            || config.render_shape == RenderShape::Off
            || detections.is_empty()
        {
            return;
        }

        let mut to_render: Vec<&Detection> = detections.iter().collect();
        let cap = config.max_detections_to_render;
        if cap > 0 && to_render.len() > cap {
            to_render.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            let dropped = to_render.len() - cap;
            to_render.truncate(cap);
            log::debug!("render cap: dropped {dropped} of {} detections", detections.len());
        }

        for (i, detection) in to_render.iter().enumerate() {
            let color = self.detection_color(detection, config);

            let x = scale(detection.bbox.x, render_scale);
            let y = scale(detection.bbox.y, render_scale);
            let w = scale(detection.bbox.width, render_scale);
            let h = scale(detection.bbox.height, render_scale);
            let cx = scale(detection.centroid.0, render_scale);
            let cy = scale(detection.centroid.1, render_scale);

            if config.render_contours {
                if let Some(contour) = &detection.contour {
                    let scaled: Vec<(i32, i32)> = contour
                        .iter()
                        .map(|&(px, py)| (scale(px, render_scale), scale(py, render_scale)))
                        .collect();
                    draw::points(frame, &scaled, color);
                }
            }

            match config.render_shape {
                RenderShape::Box => {
                    draw::rect_outline(frame, x, y, w, h, color, STROKE);
                    draw::disk(frame, cx, cy, 3, color);
                }
                RenderShape::Circle => {
                    let diagonal = ((w * w + h * h) as f64).sqrt() / 2.0;
                    let radius = ((diagonal * 1.1) as i32).max(5);
                    draw::circle_outline(frame, cx, cy, radius, color, STROKE);
                }
                RenderShape::Dot => {
                    draw::disk(frame, cx, cy, 5, color);
                }
                RenderShape::Off => unreachable!("filtered above"),
            }

            if config.render_text {
                let label = format!("#{} {} {}PX", i + 1, detection.kind.label(), detection.area as i64);
                draw::text(frame, &label, x, (y - 10).max(2), color);
            }
        }
    }

    /// BGR overlay color: the detection's own (saturated) hue when
    /// configured and known, otherwise a kind+confidence tier matching
    /// the conventions reviewers already know from the desktop overlay.
    fn detection_color(&self, detection: &Detection, config: &PipelineConfig) -> Color {
        if config.use_detection_color_for_rendering {
            if let Some([b, g, r]) = detection.metadata.mean_color {
                let (h, _, _) = bgr_to_hsv(b, g, r);
                let (vb, vg, vr) = hsv_to_bgr(h, 255, 255);
                return [vb, vg, vr];
            }
        }

        match detection.kind {
            DetectionKind::Fused => {
                if detection.confidence > 0.7 {
                    [255, 255, 0]
                } else if detection.confidence > 0.4 {
                    [255, 128, 0]
                } else {
                    [200, 100, 0]
                }
            }
            DetectionKind::Color => {
                if detection.confidence > 0.7 {
                    [255, 0, 255]
                } else if detection.confidence > 0.4 {
                    [255, 0, 128]
                } else {
                    [200, 0, 100]
                }
            }
            DetectionKind::Motion => {
                if detection.confidence > 0.7 {
                    [0, 255, 0]
                } else if detection.confidence > 0.4 {
                    [0, 255, 255]
                } else {
                    [0, 165, 255]
                }
            }
        }
    }
}

impl Default for DetectionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn scale(value: i32, factor: f64) -> i32 {
    if factor == 1.0 {
        value
    } else {
        (value as f64 * factor) as i32
    }
}
