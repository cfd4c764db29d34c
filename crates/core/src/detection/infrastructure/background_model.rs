use crate::imaging::GrayBuf;
use crate::shared::constants::{
    KNN_MATCH_RADIUS, KNN_REQUIRED_NEIGHBORS, KNN_SAMPLES_PER_PIXEL,
};

const INITIAL_VARIANCE: f32 = 225.0; // 15^2 gray levels
const MIN_VARIANCE: f32 = 4.0;

/// Shadow heuristic: a pixel darker than the background but within this
/// intensity-ratio band is labeled shadow, not foreground.
const SHADOW_RATIO_MIN: f32 = 0.5;
const SHADOW_RATIO_MAX: f32 = 0.95;

/// Per-pixel running Gaussian background model.
///
/// Each pixel keeps a mean and variance updated with learning rate
/// `1/history`; a pixel is foreground when its squared deviation exceeds
/// `var_threshold` times the variance. Owned exclusively by the motion
/// detector on the worker thread; reset on reconnect or resolution change.
pub struct GaussianBackgroundModel {
    mean: Vec<f32>,
    var: Vec<f32>,
    width: usize,
    height: usize,
    history: u32,
    var_threshold: f64,
    detect_shadows: bool,
    frames_seen: u64,
}

impl GaussianBackgroundModel {
    pub fn new(history: u32, var_threshold: f64, detect_shadows: bool) -> Self {
        Self {
            mean: Vec::new(),
            var: Vec::new(),
            width: 0,
            height: 0,
            history,
            var_threshold,
            detect_shadows,
            frames_seen: 0,
        }
    }

    /// Reset the model when its tuning parameters change; a model trained
    /// under old parameters would misclassify under the new ones.
    pub fn ensure_params(&mut self, history: u32, var_threshold: f64, detect_shadows: bool) {
        if self.history != history
            || self.var_threshold != var_threshold
            || self.detect_shadows != detect_shadows
        {
            self.history = history;
            self.var_threshold = var_threshold;
            self.detect_shadows = detect_shadows;
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.mean.clear();
        self.var.clear();
        self.width = 0;
        self.height = 0;
        self.frames_seen = 0;
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Classify foreground pixels and absorb the frame into the model.
    ///
    /// Until at least one frame has been absorbed there is no background
    /// to compare against, so the first call returns an empty mask.
    pub fn apply(&mut self, gray: &GrayBuf) -> GrayBuf {
        if self.width != gray.width || self.height != gray.height {
            self.reset();
            self.width = gray.width;
            self.height = gray.height;
            self.mean = gray.data.iter().map(|&v| v as f32).collect();
            self.var = vec![INITIAL_VARIANCE; gray.len()];
            self.frames_seen = 1;
            return GrayBuf::new(gray.width, gray.height);
        }

        let alpha = 1.0f32 / self.history.max(1) as f32;
        let mut mask = GrayBuf::new(gray.width, gray.height);

        for (i, &value) in gray.data.iter().enumerate() {
            let x = value as f32;
            let mean = self.mean[i];
            let var = self.var[i];
            let d = x - mean;

            let mut foreground = (d * d) as f64 > self.var_threshold * var as f64;

            if foreground && self.detect_shadows && mean > 0.0 {
                let ratio = x / mean;
                if (SHADOW_RATIO_MIN..=SHADOW_RATIO_MAX).contains(&ratio) {
                    foreground = false;
                }
            }

            if foreground {
                mask.data[i] = 255;
            }

            self.mean[i] = mean + alpha * d;
            self.var[i] = (var + alpha * (d * d - var)).max(MIN_VARIANCE);
        }

        self.frames_seen += 1;
        mask
    }
}

/// Per-pixel sample-buffer background model.
///
/// Each pixel keeps the last N absorbed samples; a pixel is background
/// when at least `KNN_REQUIRED_NEIGHBORS` samples lie within
/// `KNN_MATCH_RADIUS` gray levels. Samples are refreshed round-robin,
/// one slot every `history / N` frames, so the buffer spans roughly the
/// configured history without any RNG.
pub struct KnnBackgroundModel {
    samples: Vec<u8>,
    width: usize,
    height: usize,
    history: u32,
    frames_seen: u64,
    next_slot: usize,
}

impl KnnBackgroundModel {
    pub fn new(history: u32) -> Self {
        Self {
            samples: Vec::new(),
            width: 0,
            height: 0,
            history,
            frames_seen: 0,
            next_slot: 0,
        }
    }

    pub fn ensure_params(&mut self, history: u32) {
        if self.history != history {
            self.history = history;
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.width = 0;
        self.height = 0;
        self.frames_seen = 0;
        self.next_slot = 0;
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn apply(&mut self, gray: &GrayBuf) -> GrayBuf {
        let n = KNN_SAMPLES_PER_PIXEL;

        if self.width != gray.width || self.height != gray.height {
            self.reset();
            self.width = gray.width;
            self.height = gray.height;
            self.samples = vec![0; gray.len() * n];
            for (i, &v) in gray.data.iter().enumerate() {
                self.samples[i * n..(i + 1) * n].fill(v);
            }
            self.frames_seen = 1;
            return GrayBuf::new(gray.width, gray.height);
        }

        let mut mask = GrayBuf::new(gray.width, gray.height);
        for (i, &value) in gray.data.iter().enumerate() {
            let neighbors = self.samples[i * n..(i + 1) * n]
                .iter()
                .filter(|&&s| s.abs_diff(value) <= KNN_MATCH_RADIUS)
                .count();
            if neighbors < KNN_REQUIRED_NEIGHBORS {
                mask.data[i] = 255;
            }
        }

        // Refresh one sample slot per update interval
        let interval = (self.history as usize / n).max(1);
        if self.frames_seen % interval as u64 == 0 {
            let slot = self.next_slot;
            for (i, &v) in gray.data.iter().enumerate() {
                self.samples[i * n + slot] = v;
            }
            self.next_slot = (self.next_slot + 1) % n;
        }

        self.frames_seen += 1;
        mask
    }
}
