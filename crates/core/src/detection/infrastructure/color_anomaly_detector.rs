use std::collections::HashMap;

use crate::imaging::blobs::{blob_at, find_blobs};
use crate::imaging::hsv::{hue_in_range, hue_plane, mean_hue_in_rect};
use crate::imaging::morphology::{close, open, StructuringElement};
use crate::imaging::resize::{downscale_half, resize_gray_nearest};
use crate::imaging::GrayBuf;
use crate::shared::config::PipelineConfig;
use crate::shared::constants::RARITY_ABSOLUTE_MAX_FRACTION;
use crate::shared::detection::{Detection, DetectionKind};
use crate::shared::frame::Frame;

/// Kernel used to clean up hue-expansion masks, independent of the
/// configured morphology size.
const HUE_EXPANSION_KERNEL: usize = 3;

/// Rarity detector over a quantized color histogram.
///
/// Colors whose quantized bin population falls below the configured
/// percentile of the (nonzero) bin distribution are flagged anomalous.
/// The histogram runs on a half-size copy of the processing frame; masks
/// are scaled back up before contour extraction.
pub struct ColorAnomalyDetector {
    morph_cache: HashMap<usize, StructuringElement>,
}

impl ColorAnomalyDetector {
    pub fn new() -> Self {
        Self {
            morph_cache: HashMap::new(),
        }
    }

    pub fn detect(
        &mut self,
        frame: &Frame,
        config: &PipelineConfig,
        timestamp: f64,
    ) -> Vec<Detection> {
        let full_w = frame.width() as usize;
        let full_h = frame.height() as usize;
        let small = downscale_half(frame);
        let small_w = small.width() as usize;
        let small_h = small.height() as usize;

        let bits = config.color_quantization_bits as u32;
        let bins_per_channel = 1usize << bits;
        let shift = 8 - bits;

        // Quantized bin index per half-res pixel
        let mut indices = Vec::with_capacity(small_w * small_h);
        for px in small.data().chunks_exact(3) {
            let b = (px[0] >> shift) as usize;
            let g = (px[1] >> shift) as usize;
            let r = (px[2] >> shift) as usize;
            indices.push(b + g * bins_per_channel + r * bins_per_channel * bins_per_channel);
        }

        let mut histogram = vec![0u32; bins_per_channel.pow(3)];
        for &idx in &indices {
            histogram[idx] += 1;
        }

        let total_pixels = (small_w * small_h) as f64;
        let mut nonzero: Vec<u32> = histogram.iter().copied().filter(|&c| c > 0).collect();
        if nonzero.is_empty() {
            return Vec::new();
        }
        nonzero.sort_unstable();

        let percentile_value = percentile(&nonzero, config.color_rarity_percentile);
        let threshold = percentile_value.min(total_pixels * RARITY_ABSOLUTE_MAX_FRACTION);

        let mut rare_bins = vec![false; histogram.len()];
        for (bin, &count) in histogram.iter().enumerate() {
            rare_bins[bin] = count > 0 && (count as f64) < threshold;
        }
        rare_bins[0] = false;

        let mut mask_small = GrayBuf::new(small_w, small_h);
        for (i, &idx) in indices.iter().enumerate() {
            if rare_bins[idx] {
                mask_small.data[i] = 255;
            }
        }

        let mut mask = resize_gray_nearest(&mask_small, full_w, full_h);

        let element = self.morph_element(config.morphology_kernel_size);
        mask = close(&open(&mask, &element), &element);

        // Known background hues are removed from the mask before contour
        // extraction so they never form detections at all
        let mut hue: Option<GrayBuf> = None;
        if config.enable_color_exclusion && !config.excluded_hue_ranges.is_empty() {
            let hue = hue.get_or_insert_with(|| hue_plane(frame));
            for i in 0..mask.len() {
                if mask.data[i] == 0 {
                    continue;
                }
                let h = hue.data[i] as f64;
                if config
                    .excluded_hue_ranges
                    .iter()
                    .any(|&(min, max)| hue_in_range(h, min, max))
                {
                    mask.data[i] = 0;
                }
            }
        }

        let mut detections = Vec::new();
        for blob in find_blobs(&mask) {
            if blob.area < config.color_min_detection_area
                || blob.area > config.color_max_detection_area
            {
                continue;
            }

            let (cx, cy) = blob.centroid;
            let (confidence, rarity, bin_count) = {
                let sx = (cx / 2) as usize;
                let sy = (cy / 2) as usize;
                if sx < small_w && sy < small_h {
                    let count = histogram[indices[sy * small_w + sx]];
                    let rarity = 1.0 - count as f64 / total_pixels;
                    ((rarity * 2.0).min(1.0), rarity, count)
                } else {
                    (0.5, 0.5, 0)
                }
            };

            let mut d = Detection::new(
                blob.bbox,
                blob.area,
                confidence,
                DetectionKind::Color,
                timestamp,
            );
            d.centroid = blob.centroid;
            d.contour = Some(blob.outline);
            d.metadata.mean_color = mean_bgr_in_bbox(frame, &d);
            d.metadata.rarity = Some(rarity);
            d.metadata.bin_count = Some(bin_count);
            detections.push(d);
        }

        if config.enable_hue_expansion && config.hue_expansion_range > 0 && !detections.is_empty() {
            let hue = hue.get_or_insert_with(|| hue_plane(frame));
            detections = detections
                .into_iter()
                .map(|d| self.expand_by_hue(hue, d, config))
                .filter(|d| {
                    d.area >= config.color_min_detection_area
                        && d.area <= config.color_max_detection_area
                })
                .collect();
        }

        detections
    }

    /// Grow a detection to the full connected region of similar hue.
    ///
    /// Builds a frame-wide mask of pixels within ±`hue_expansion_range` of
    /// the detection's mean hue (wrapping at red), then takes the component
    /// containing the detection centroid. The original detection survives
    /// unchanged when expansion finds nothing bigger.
    fn expand_by_hue(
        &mut self,
        hue: &GrayBuf,
        detection: Detection,
        config: &PipelineConfig,
    ) -> Detection {
        let bbox = detection.bbox;
        let Some(mean_hue) = mean_hue_in_rect(hue, bbox.x, bbox.y, bbox.width, bbox.height) else {
            return detection;
        };

        let range = config.hue_expansion_range as f64;
        let min = (mean_hue - range).rem_euclid(180.0);
        let max = (mean_hue + range).rem_euclid(180.0);

        let mut mask = GrayBuf::new(hue.width, hue.height);
        for i in 0..hue.len() {
            if hue_in_range(hue.data[i] as f64, min, max) {
                mask.data[i] = 255;
            }
        }

        let element = self.morph_element(HUE_EXPANSION_KERNEL);
        let mask = open(&close(&mask, &element), &element);

        let (cx, cy) = detection.centroid;
        match blob_at(&mask, cx, cy) {
            Some(blob) if blob.area > detection.area => {
                let mut expanded = detection;
                expanded.bbox = blob.bbox;
                expanded.centroid = blob.centroid;
                expanded.area = blob.area;
                expanded.contour = Some(blob.outline);
                expanded.metadata.hue_expanded = true;
                expanded
            }
            _ => detection,
        }
    }

    fn morph_element(&mut self, size: usize) -> StructuringElement {
        self.morph_cache
            .entry(size)
            .or_insert_with(|| StructuringElement::ellipse(size))
            .clone()
    }
}

impl Default for ColorAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolated percentile of a sorted sample, matching numpy's
/// default method.
fn percentile(sorted: &[u32], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}

fn mean_bgr_in_bbox(frame: &Frame, detection: &Detection) -> Option<[u8; 3]> {
    let w = frame.width() as i32;
    let h = frame.height() as i32;
    let bbox = detection.bbox;
    let x0 = bbox.x.clamp(0, w - 1);
    let y0 = bbox.y.clamp(0, h - 1);
    let x1 = (bbox.x + bbox.width).clamp(x0 + 1, w);
    let y1 = (bbox.y + bbox.height).clamp(y0 + 1, h);

    let data = frame.data();
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let offset = (y as usize * w as usize + x as usize) * 3;
            for c in 0..3 {
                sums[c] += data[offset + c] as u64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> PipelineConfig {
        PipelineConfig {
            enable_color_quantization: true,
            color_quantization_bits: 4,
            color_rarity_percentile: 50.0,
            color_min_detection_area: 4.0,
            color_max_detection_area: 10_000.0,
            morphology_kernel_size: 3,
            ..Default::default()
        }
        .normalized()
    }

    /// Mostly-green frame with a red square: the red bin is rare.
    fn frame_with_red_square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> Frame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..w * h {
            data.extend_from_slice(&[40, 180, 40]); // BGR green
        }
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                let offset = ((y * w + x) * 3) as usize;
                data[offset] = 20; // B
                data[offset + 1] = 20; // G
                data[offset + 2] = 230; // R
            }
        }
        Frame::new(data, w, h, 3, 0)
    }

    #[test]
    fn test_detects_rare_red_square() {
        let mut detector = ColorAnomalyDetector::new();
        let frame = frame_with_red_square(64, 64, 20, 24, 12);
        let detections = detector.detect(&frame, &config(), 0.0);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.kind, DetectionKind::Color);
        // Centroid lands at the square's center (±1px for half-res rounding)
        assert!((d.centroid.0 - 25).abs() <= 1, "centroid {:?}", d.centroid);
        assert!((d.centroid.1 - 29).abs() <= 1, "centroid {:?}", d.centroid);
        assert!(d.confidence > 0.9);
        assert!(d.metadata.rarity.unwrap() > 0.9);
        // Mean color is dominated by red
        let mean = d.metadata.mean_color.unwrap();
        assert!(mean[2] > 150 && mean[1] < 100);
    }

    #[test]
    fn test_uniform_frame_has_no_anomalies() {
        let mut detector = ColorAnomalyDetector::new();
        let frame = Frame::new(vec![100u8; 64 * 64 * 3], 64, 64, 3, 0);
        assert!(detector.detect(&frame, &config(), 0.0).is_empty());
    }

    #[test]
    fn test_area_gate_rejects_oversized_region() {
        let cfg = PipelineConfig {
            color_max_detection_area: 50.0,
            ..config()
        };
        let mut detector = ColorAnomalyDetector::new();
        let frame = frame_with_red_square(64, 64, 20, 24, 12);
        assert!(detector.detect(&frame, &cfg, 0.0).is_empty());
    }

    #[test]
    fn test_color_exclusion_suppresses_excluded_hue() {
        // Red is hue 0 (half-scale); exclude a wraparound band over red
        let cfg = PipelineConfig {
            enable_color_exclusion: true,
            excluded_hue_ranges: vec![(175.0, 5.0)],
            ..config()
        };
        let mut detector = ColorAnomalyDetector::new();
        let frame = frame_with_red_square(64, 64, 20, 24, 12);
        assert!(detector.detect(&frame, &cfg, 0.0).is_empty());
    }

    #[test]
    fn test_color_exclusion_keeps_other_hues() {
        // Excluding blue must not affect the red square
        let cfg = PipelineConfig {
            enable_color_exclusion: true,
            excluded_hue_ranges: vec![(110.0, 130.0)],
            ..config()
        };
        let mut detector = ColorAnomalyDetector::new();
        let frame = frame_with_red_square(64, 64, 20, 24, 12);
        assert_eq!(detector.detect(&frame, &cfg, 0.0).len(), 1);
    }

    #[test]
    fn test_hue_expansion_grows_detection() {
        // Pale red ring around a saturated red core: the core's bin is
        // rare, and hue expansion should absorb the ring of similar hue
        let cfg = PipelineConfig {
            enable_hue_expansion: true,
            hue_expansion_range: 10,
            ..config()
        };
        let mut data = Vec::with_capacity(64 * 64 * 3);
        for _ in 0..64 * 64 {
            data.extend_from_slice(&[40, 180, 40]);
        }
        // 16x16 pale red ring region
        for y in 20u32..36 {
            for x in 20u32..36 {
                let offset = ((y * 64 + x) * 3) as usize;
                data[offset] = 90;
                data[offset + 1] = 90;
                data[offset + 2] = 220;
            }
        }
        // 6x6 saturated red core
        for y in 25u32..31 {
            for x in 25u32..31 {
                let offset = ((y * 64 + x) * 3) as usize;
                data[offset] = 10;
                data[offset + 1] = 10;
                data[offset + 2] = 250;
            }
        }
        let frame = Frame::new(data, 64, 64, 3, 0);

        let mut plain_detector = ColorAnomalyDetector::new();
        let plain = plain_detector.detect(&frame, &config(), 0.0);
        let mut expanded_detector = ColorAnomalyDetector::new();
        let expanded = expanded_detector.detect(&frame, &cfg, 0.0);

        let plain_max = plain.iter().map(|d| d.area as u64).max().unwrap_or(0);
        let expanded_max = expanded.iter().map(|d| d.area as u64).max().unwrap_or(0);
        assert!(expanded_max > plain_max);
        assert!(expanded.iter().any(|d| d.metadata.hue_expanded));
    }

    // ── Percentile ───────────────────────────────────────────────────

    #[test]
    fn test_percentile_endpoints() {
        let sorted = vec![1, 2, 3, 4, 5];
        assert_relative_eq!(percentile(&sorted, 0.0), 1.0);
        assert_relative_eq!(percentile(&sorted, 100.0), 5.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = vec![10, 20];
        assert_relative_eq!(percentile(&sorted, 50.0), 15.0);
    }

    #[test]
    fn test_percentile_single_sample() {
        assert_relative_eq!(percentile(&[7], 30.0), 7.0);
    }
}
