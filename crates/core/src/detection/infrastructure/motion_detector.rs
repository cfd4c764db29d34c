use std::collections::{HashMap, VecDeque};

use crate::detection::infrastructure::background_model::{
    GaussianBackgroundModel, KnnBackgroundModel,
};
use crate::imaging::blobs::find_blobs;
use crate::imaging::gray::{absdiff, threshold_binary};
use crate::imaging::morphology::{close, open, StructuringElement};
use crate::imaging::GrayBuf;
use crate::shared::config::{MotionAlgorithm, PipelineConfig};
use crate::shared::detection::{Detection, DetectionKind};

/// Motion detector over pre-blurred grayscale frames.
///
/// Three algorithm variants share the same post-processing: a pixel-level
/// persistence vote over the last `persistence_frames` masks, optional
/// morphological open/close, then blob extraction with area gating.
pub struct MotionDetector {
    prev_gray: Option<GrayBuf>,
    mog2: GaussianBackgroundModel,
    knn: KnnBackgroundModel,
    mask_history: VecDeque<GrayBuf>,
    morph_cache: HashMap<usize, StructuringElement>,
}

impl MotionDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            prev_gray: None,
            mog2: GaussianBackgroundModel::new(
                config.bg_history,
                config.bg_var_threshold,
                config.bg_detect_shadows,
            ),
            knn: KnnBackgroundModel::new(config.bg_history),
            mask_history: VecDeque::new(),
            morph_cache: HashMap::new(),
        }
    }

    /// Detect moving regions in one frame.
    ///
    /// Returns an empty list while the selected background model is still
    /// warming up (nothing to compare against yet).
    pub fn detect(
        &mut self,
        gray: &GrayBuf,
        config: &PipelineConfig,
        timestamp: f64,
    ) -> Vec<Detection> {
        let raw_mask = match config.motion_algorithm {
            MotionAlgorithm::FrameDiff => self.frame_diff_mask(gray, config),
            MotionAlgorithm::Mog2 => {
                self.mog2.ensure_params(
                    config.bg_history,
                    config.bg_var_threshold,
                    config.bg_detect_shadows,
                );
                Some(self.mog2.apply(gray))
            }
            MotionAlgorithm::Knn => {
                self.knn.ensure_params(config.bg_history);
                Some(self.knn.apply(gray))
            }
        };
        self.prev_gray = Some(gray.clone());

        let Some(raw_mask) = raw_mask else {
            return Vec::new();
        };

        let voted = self.apply_persistence(raw_mask, config);

        let mask = if config.enable_morphology {
            let element = self.morph_element(config.morphology_kernel_size);
            close(&open(&voted, &element), &element)
        } else {
            voted
        };

        self.extract_detections(&mask, config, timestamp)
    }

    /// Drop all temporal state: previous frame, persistence votes, and
    /// both background models. Called on stream reconnect.
    pub fn reset(&mut self) {
        self.prev_gray = None;
        self.mask_history.clear();
        self.mog2.reset();
        self.knn.reset();
    }

    fn frame_diff_mask(&mut self, gray: &GrayBuf, config: &PipelineConfig) -> Option<GrayBuf> {
        let prev = self.prev_gray.as_ref()?;
        if prev.width != gray.width || prev.height != gray.height {
            return None;
        }
        let diff = absdiff(prev, gray);
        Some(threshold_binary(&diff, config.motion_threshold))
    }

    /// N-of-M pixel vote across recent masks: a pixel survives only if it
    /// was set in at least `persistence_threshold` of the last
    /// `persistence_frames` masks. Suppresses single-frame speckle before
    /// the (independent) detection-level temporal filter downstream.
    fn apply_persistence(&mut self, mask: GrayBuf, config: &PipelineConfig) -> GrayBuf {
        let window = config.persistence_frames;
        let threshold = config.persistence_threshold;

        // Masks from a different resolution can't vote together
        self.mask_history
            .retain(|m| m.width == mask.width && m.height == mask.height);

        self.mask_history.push_back(mask.clone());
        while self.mask_history.len() > window {
            self.mask_history.pop_front();
        }

        if threshold <= 1 {
            return mask;
        }

        let mut voted = GrayBuf::new(mask.width, mask.height);
        for i in 0..mask.len() {
            if mask.data[i] == 0 {
                continue;
            }
            let votes = self
                .mask_history
                .iter()
                .filter(|m| m.data[i] != 0)
                .count();
            if votes >= threshold {
                voted.data[i] = 255;
            }
        }
        voted
    }

    fn extract_detections(
        &self,
        mask: &GrayBuf,
        config: &PipelineConfig,
        timestamp: f64,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();
        for blob in find_blobs(mask) {
            if blob.area < config.min_detection_area || blob.area > config.max_detection_area {
                continue;
            }
            let confidence = (blob.area / config.max_detection_area).min(1.0);
            let mut d = Detection::new(
                blob.bbox,
                blob.area,
                confidence,
                DetectionKind::Motion,
                timestamp,
            );
            d.centroid = blob.centroid;
            d.contour = Some(blob.outline);
            detections.push(d);
        }
        detections
    }

    fn morph_element(&mut self, size: usize) -> StructuringElement {
        self.morph_cache
            .entry(size)
            .or_insert_with(|| StructuringElement::ellipse(size))
            .clone()
    }
}
