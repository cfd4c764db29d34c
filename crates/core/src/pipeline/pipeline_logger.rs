use std::collections::HashMap;
use std::time::Instant;

use crate::pipeline::metrics::{PerformanceMetrics, StageTimings};

/// Cross-cutting observer for streaming pipeline events.
///
/// Decouples the frame loop from specific output mechanisms (stdout, GUI
/// signals, log crate) so each caller can watch throughput and stage cost
/// without changing orchestration code.
pub trait PipelineLogger: Send {
    /// Report frame-level progress (`total` is 0 for live sources).
    fn progress(&mut self, current: usize, total: usize);

    /// Record one frame's stage timing breakdown.
    fn frame_timings(&mut self, timings: &StageTimings);

    /// Record a point-in-time metric (e.g. dropped frames, bucket count).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-stream summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events. Used by callers with their own
/// progress surface and by tests.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn frame_timings(&mut self, _timings: &StageTimings) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// CLI-oriented logger: accumulates stage timings and metrics, throttles
/// progress output, and prints a summary at end of stream.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    metrics: PerformanceMetrics,
    extra_metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    frames_seen: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            metrics: PerformanceMetrics::new(),
            extra_metrics: HashMap::new(),
            start_time: Instant::now(),
            frames_seen: 0,
        }
    }

    /// Formatted end-of-stream report, or `None` before any frame.
    pub fn summary_string(&self) -> Option<String> {
        if self.frames_seen == 0 {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let avg = self.metrics.average_timings();
        let mut lines = Vec::new();

        lines.push(format!(
            "Stream summary ({} frames, {elapsed_s:.1}s total):",
            self.frames_seen
        ));
        for (stage, ms) in [
            ("preprocess", avg.preprocess_ms),
            ("motion", avg.motion_ms),
            ("color", avg.color_ms),
            ("fusion", avg.fusion_ms),
            ("filters", avg.filter_ms),
            ("render", avg.render_ms),
        ] {
            lines.push(format!("  {stage:12}: avg {ms:6.1}ms"));
        }
        lines.push(format!("  {:12}: avg {:6.1}ms", "total", avg.total_ms));

        let mut names: Vec<_> = self.extra_metrics.keys().collect();
        names.sort();
        for name in names {
            let values = &self.extra_metrics[name];
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            lines.push(format!("  {name}: avg {avg:.1}"));
        }

        if elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} fps",
                self.frames_seen as f64 / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        if current % self.throttle_frames != 0 {
            return;
        }
        if total > 0 {
            eprint!("\rProcessing frame {current}/{total}");
        } else {
            eprint!("\rProcessing frame {current}");
        }
    }

    fn frame_timings(&mut self, timings: &StageTimings) {
        self.frames_seen += 1;
        self.metrics.update(*timings, 0);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.extra_metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(summary) = self.summary_string() {
            eprintln!();
            println!("{summary}");
        }
    }
}
