use crate::shared::config::{FusionMode, PipelineConfig};
use crate::shared::detection::{merge_detections, Detection, DetectionKind, DEFAULT_IOU_THRESHOLD};

/// Combine motion and color detections under the configured policy.
///
/// Applies only when both detectors produced candidates; a single-source
/// frame passes through untouched, as does everything when fusion is
/// disabled (plain concatenation).
pub fn fuse(
    motion: Vec<Detection>,
    color: Vec<Detection>,
    config: &PipelineConfig,
) -> Vec<Detection> {
    if motion.is_empty() {
        return color;
    }
    if color.is_empty() {
        return motion;
    }
    if !config.enable_fusion {
        let mut all = motion;
        all.extend(color);
        return all;
    }

    match config.fusion_mode {
        FusionMode::Union => {
            let mut all = motion;
            all.extend(color);
            all
        }
        FusionMode::Intersection => {
            let pairs = match_pairs(&motion, &color, config);
            pairs
                .into_iter()
                .map(|(mi, ci)| {
                    let m = &motion[mi];
                    let c = &color[ci];
                    let mut merged = merge_detections(&[m.clone(), c.clone()]);
                    merged.kind = DetectionKind::Fused;
                    merged.confidence = ((m.confidence + c.confidence) / 2.0 * 1.5).min(1.0);
                    merged
                })
                .collect()
        }
        FusionMode::ColorPriority => {
            let pairs = match_pairs(&motion, &color, config);
            let matched_motion: Vec<usize> = pairs.iter().map(|&(mi, _)| mi).collect();
            let mut result = color;
            for (i, m) in motion.into_iter().enumerate() {
                if matched_motion.contains(&i) {
                    result.push(m);
                }
            }
            result
        }
        FusionMode::MotionPriority => {
            let pairs = match_pairs(&motion, &color, config);
            let matched_color: Vec<usize> = pairs.iter().map(|&(_, ci)| ci).collect();
            let mut result = motion;
            for (i, c) in color.into_iter().enumerate() {
                if matched_color.contains(&i) {
                    result.push(c);
                }
            }
            result
        }
    }
}

/// Greedy one-to-one matching, highest IoU first.
///
/// A pair is a candidate when its IoU exceeds the fixed threshold OR its
/// centroids sit within `fusion_match_distance` pixels. Each detection
/// matches at most once.
fn match_pairs(
    motion: &[Detection],
    color: &[Detection],
    config: &PipelineConfig,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (mi, m) in motion.iter().enumerate() {
        for (ci, c) in color.iter().enumerate() {
            let iou = m.bbox.iou(&c.bbox);
            if iou > DEFAULT_IOU_THRESHOLD || m.centroid_distance(c) <= config.fusion_match_distance
            {
                candidates.push((iou, mi, ci));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut used_motion = vec![false; motion.len()];
    let mut used_color = vec![false; color.len()];
    let mut pairs = Vec::new();
    for (_, mi, ci) in candidates {
        if used_motion[mi] || used_color[ci] {
            continue;
        }
        used_motion[mi] = true;
        used_color[ci] = true;
        pairs.push((mi, ci));
    }
    pairs
}
