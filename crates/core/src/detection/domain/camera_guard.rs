use crate::imaging::gray::{absdiff, threshold_binary};
use crate::imaging::GrayBuf;
use crate::shared::config::PipelineConfig;
use crate::shared::constants::{
    CAMERA_MOVEMENT_DIFF_THRESHOLD, CAMERA_MOVEMENT_RELEASE_RATIO,
};

/// Detects global frame motion (the aircraft panning) and gates detection
/// output while it lasts.
///
/// The fraction of pixels whose gray level changed between consecutive
/// frames is compared against `camera_movement_threshold`. The gate
/// engages above the threshold and releases only below
/// `threshold * CAMERA_MOVEMENT_RELEASE_RATIO`, so a fraction hovering at
/// the boundary cannot flicker the gate frame to frame.
pub struct CameraMovementGuard {
    prev_gray: Option<GrayBuf>,
    moving: bool,
}

impl CameraMovementGuard {
    pub fn new() -> Self {
        Self {
            prev_gray: None,
            moving: false,
        }
    }

    pub fn reset(&mut self) {
        self.prev_gray = None;
        self.moving = false;
    }

    /// Returns true when detection should be suppressed for this frame.
    ///
    /// Always absorbs the frame as the new comparison baseline, even when
    /// the feature is disabled, so enabling it mid-stream works from the
    /// next frame.
    pub fn check(&mut self, gray: &GrayBuf, config: &PipelineConfig) -> bool {
        let prev = self.prev_gray.replace(gray.clone());

        if !config.pause_on_camera_movement {
            self.moving = false;
            return false;
        }

        let Some(prev) = prev else {
            return self.moving;
        };
        if prev.width != gray.width || prev.height != gray.height {
            self.moving = false;
            return false;
        }

        let diff = threshold_binary(&absdiff(&prev, gray), CAMERA_MOVEMENT_DIFF_THRESHOLD);
        let fraction = diff.count_nonzero() as f64 / diff.len() as f64;

        let threshold = config.camera_movement_threshold;
        if self.moving {
            self.moving = fraction >= threshold * CAMERA_MOVEMENT_RELEASE_RATIO;
        } else {
            self.moving = fraction > threshold;
        }
        self.moving
    }
}

impl Default for CameraMovementGuard {
    fn default() -> Self {
        Self::new()
    }
}
