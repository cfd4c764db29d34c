use crate::shared::config::PipelineConfig;
use crate::shared::detection::{merge_detections, Detection};

/// Geometric false-positive reduction, applied after temporal
/// confirmation. Aspect-ratio rejection runs before clustering so merges
/// only ever operate on already-valid shapes.
pub fn apply(detections: Vec<Detection>, config: &PipelineConfig) -> Vec<Detection> {
    let detections = aspect_ratio_filter(detections, config);
    cluster(detections, config)
}

/// Reject detections whose width/height ratio falls outside the
/// configured band. Bounds are inclusive: a ratio exactly at either limit
/// is kept.
pub fn aspect_ratio_filter(detections: Vec<Detection>, config: &PipelineConfig) -> Vec<Detection> {
    if !config.enable_aspect_ratio_filter {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| {
            if d.bbox.height == 0 {
                return false;
            }
            let ratio = d.bbox.width as f64 / d.bbox.height as f64;
            ratio >= config.min_aspect_ratio && ratio <= config.max_aspect_ratio
        })
        .collect()
}

/// Merge detections whose centroids sit within `clustering_distance` of a
/// cluster seed. Greedy over input order: each detection seeds a cluster,
/// gathers everything near it, and merged members drop out of later
/// clusters.
pub fn cluster(detections: Vec<Detection>, config: &PipelineConfig) -> Vec<Detection> {
    if !config.enable_detection_clustering || detections.is_empty() {
        return detections;
    }

    let mut consumed = vec![false; detections.len()];
    let mut clustered = Vec::new();

    for i in 0..detections.len() {
        if consumed[i] {
            continue;
        }
        consumed[i] = true;
        let mut members = vec![detections[i].clone()];

        for j in (i + 1)..detections.len() {
            if consumed[j] {
                continue;
            }
            if detections[i].centroid_distance(&detections[j]) <= config.clustering_distance {
                consumed[j] = true;
                members.push(detections[j].clone());
            }
        }

        if members.len() > 1 {
            let mut merged = merge_detections(&members);
            merged.metadata.clustered = true;
            merged.metadata.cluster_size = members.len();
            clustered.push(merged);
        } else {
            clustered.push(members.pop().expect("cluster seeded with one member"));
        }
    }

    clustered
}
