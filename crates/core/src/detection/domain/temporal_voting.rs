use std::collections::VecDeque;

use crate::shared::config::PipelineConfig;
use crate::shared::constants::TEMPORAL_MATCH_DISTANCE;
use crate::shared::detection::{BBox, Detection, DEFAULT_IOU_THRESHOLD};

/// One spatial bucket: the last place a recurring detection was seen and
/// its hit/miss history over the voting window.
///
/// Buckets are proximity clusters, not object tracks — association is
/// nearest-centroid per frame, with no identity guarantee when two
/// objects cross.
struct Bucket {
    bbox: BBox,
    centroid: (i32, i32),
    history: VecDeque<bool>,
}

impl Bucket {
    fn hits(&self) -> usize {
        self.history.iter().filter(|&&h| h).count()
    }

    fn push(&mut self, hit: bool, window: usize) {
        self.history.push_back(hit);
        while self.history.len() > window {
            self.history.pop_front();
        }
    }
}

/// Cross-frame N-of-M confirmation filter.
///
/// A detection is forwarded only once its bucket has been hit in at
/// least `temporal_threshold_frames` of the last `temporal_window_frames`
/// observations — so a single-frame blob can never reach the output, not
/// even at stream start. Buckets that go a full window without a hit are
/// evicted, bounding memory to currently-active regions.
pub struct TemporalVotingFilter {
    buckets: Vec<Bucket>,
}

impl TemporalVotingFilter {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    pub fn apply(
        &mut self,
        detections: Vec<Detection>,
        config: &PipelineConfig,
    ) -> Vec<Detection> {
        if !config.enable_temporal_voting {
            return detections;
        }

        let window = config.temporal_window_frames;
        let threshold = config.temporal_threshold_frames;

        // A shrunken window must not keep stale votes alive
        for bucket in &mut self.buckets {
            while bucket.history.len() > window {
                bucket.history.pop_front();
            }
        }

        let mut matched_bucket = vec![false; self.buckets.len()];
        let mut confirmed = Vec::new();

        for detection in detections {
            let best = self
                .buckets
                .iter()
                .enumerate()
                .filter(|&(i, b)| {
                    !matched_bucket[i]
                        && (detection.bbox.iou(&b.bbox) > DEFAULT_IOU_THRESHOLD
                            || centroid_distance(detection.centroid, b.centroid)
                                <= TEMPORAL_MATCH_DISTANCE)
                })
                .min_by(|(_, a), (_, b)| {
                    centroid_distance(detection.centroid, a.centroid)
                        .total_cmp(&centroid_distance(detection.centroid, b.centroid))
                })
                .map(|(i, _)| i);

            let bucket_idx = match best {
                Some(i) => {
                    matched_bucket[i] = true;
                    let bucket = &mut self.buckets[i];
                    bucket.bbox = detection.bbox;
                    bucket.centroid = detection.centroid;
                    bucket.push(true, window);
                    i
                }
                None => {
                    self.buckets.push(Bucket {
                        bbox: detection.bbox,
                        centroid: detection.centroid,
                        history: VecDeque::from([true]),
                    });
                    matched_bucket.push(true);
                    self.buckets.len() - 1
                }
            };

            if self.buckets[bucket_idx].hits() >= threshold {
                confirmed.push(detection);
            }
        }

        // Record a miss everywhere nothing landed, evicting buckets that
        // have been silent for the whole window
        let mut i = 0;
        while i < self.buckets.len() {
            if !matched_bucket[i] {
                self.buckets[i].push(false, window);
            }
            let bucket = &self.buckets[i];
            if bucket.history.len() >= window && bucket.hits() == 0 {
                self.buckets.swap_remove(i);
                matched_bucket.swap_remove(i);
            } else {
                i += 1;
            }
        }

        confirmed
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for TemporalVotingFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn centroid_distance(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}
