use std::collections::VecDeque;
use std::time::Instant;

/// Per-frame timing breakdown across pipeline stages, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTimings {
    pub preprocess_ms: f64,
    pub motion_ms: f64,
    pub color_ms: f64,
    pub fusion_ms: f64,
    pub filter_ms: f64,
    pub render_ms: f64,
    pub total_ms: f64,
    /// Frame-rate limiting skipped this frame; only `total_ms` is real.
    pub was_skipped: bool,
}

const MAX_RECENT_SAMPLES: usize = 30;

/// Rolling performance statistics for a streaming session.
///
/// Keeps the last 30 frame timings for averaging and derives fps from a
/// one-second sliding counter.
#[derive(Debug)]
pub struct PerformanceMetrics {
    pub fps: f64,
    pub frame_count: usize,
    pub detection_count: usize,
    pub dropped_frames: usize,
    recent: VecDeque<StageTimings>,
    fps_counter: usize,
    fps_window_start: Instant,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            fps: 0.0,
            frame_count: 0,
            detection_count: 0,
            dropped_frames: 0,
            recent: VecDeque::new(),
            fps_counter: 0,
            fps_window_start: Instant::now(),
        }
    }

    pub fn update(&mut self, timings: StageTimings, detection_count: usize) {
        self.frame_count += 1;
        self.detection_count = detection_count;
        self.recent.push_back(timings);
        while self.recent.len() > MAX_RECENT_SAMPLES {
            self.recent.pop_front();
        }

        self.fps_counter += 1;
        let elapsed = self.fps_window_start.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.fps_counter as f64 / elapsed;
            self.fps_counter = 0;
            self.fps_window_start = Instant::now();
        }
    }

    /// Mean of the retained recent timings.
    pub fn average_timings(&self) -> StageTimings {
        if self.recent.is_empty() {
            return StageTimings::default();
        }
        let n = self.recent.len() as f64;
        let mut avg = StageTimings::default();
        for t in &self.recent {
            avg.preprocess_ms += t.preprocess_ms;
            avg.motion_ms += t.motion_ms;
            avg.color_ms += t.color_ms;
            avg.fusion_ms += t.fusion_ms;
            avg.filter_ms += t.filter_ms;
            avg.render_ms += t.render_ms;
            avg.total_ms += t.total_ms;
        }
        avg.preprocess_ms /= n;
        avg.motion_ms /= n;
        avg.color_ms /= n;
        avg.fusion_ms /= n;
        avg.filter_ms /= n;
        avg.render_ms /= n;
        avg.total_ms /= n;
        avg
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
