use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::pipeline::detection_pipeline::DetectionPipeline;
use crate::pipeline::metrics::StageTimings;
use crate::shared::config::PipelineConfig;
use crate::shared::constants::WORKER_RESULT_CAPACITY;
use crate::shared::detection::Detection;
use crate::shared::error::PipelineError;
use crate::shared::frame::Frame;

/// Callback the worker consults before each frame; `true` means the
/// source is paused and the frame should be skipped wholesale.
pub type PauseCheck = Box<dyn Fn() -> bool + Send>;

/// Result messages delivered back to the submitting thread.
#[derive(Debug)]
pub enum WorkerEvent {
    Processed {
        frame: Frame,
        detections: Vec<Detection>,
        timings: StageTimings,
        camera_moving: bool,
    },
    /// One frame failed; the stream continues.
    Error { message: String },
}

enum Control {
    Reconfigure(PipelineConfig),
    Reset,
    Stop,
}

/// Dedicated detection thread with single-in-flight frame handoff.
///
/// The pipeline (all detector state) is constructed inside the worker
/// thread from a config snapshot, so no stateful object ever changes
/// thread affinity. Frames go through a single-slot channel: while one
/// frame is in flight the next `submit` drops (newest-dropped
/// backpressure, counted), which keeps latency bounded on slow frames
/// without ever reordering — frames are processed strictly in
/// submission order.
pub struct FrameWorker {
    frame_tx: Sender<(Frame, f64)>,
    control_tx: Sender<Control>,
    event_rx: Receiver<WorkerEvent>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    dropped_frames: usize,
}

impl FrameWorker {
    pub fn spawn(config: PipelineConfig, pause_check: Option<PauseCheck>) -> Self {
        let (frame_tx, frame_rx) = bounded::<(Frame, f64)>(1);
        let (control_tx, control_rx) = unbounded::<Control>();
        let (event_tx, event_rx) = bounded::<WorkerEvent>(WORKER_RESULT_CAPACITY);
        let (done_tx, done_rx) = bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || {
                let _done_tx = done_tx; // dropped on exit, unblocking shutdown
                run_worker(config, pause_check, frame_rx, control_rx, event_tx);
            })
            .expect("spawning detection worker thread");

        Self {
            frame_tx,
            control_tx,
            event_rx,
            done_rx,
            handle: Some(handle),
            dropped_frames: 0,
        }
    }

    /// Hand a frame to the worker without blocking.
    ///
    /// Returns `false` when the in-flight slot was occupied and the frame
    /// was dropped (the source keeps its own pacing; dropping the newest
    /// frame is the chosen backpressure policy).
    pub fn submit(&mut self, frame: Frame, timestamp: f64) -> Result<bool, PipelineError> {
        match self.frame_tx.try_send((frame, timestamp)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::WorkerUnavailable(
                "worker thread is gone".into(),
            )),
        }
    }

    /// Swap the configuration; takes effect from the next frame the
    /// worker picks up.
    pub fn reconfigure(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        self.control_tx
            .send(Control::Reconfigure(config))
            .map_err(|_| PipelineError::WorkerUnavailable("worker thread is gone".into()))
    }

    /// Clear all detector state for a new stream source.
    pub fn reset(&self) -> Result<(), PipelineError> {
        self.control_tx
            .send(Control::Reset)
            .map_err(|_| PipelineError::WorkerUnavailable("worker thread is gone".into()))
    }

    /// Non-blocking poll for the next result.
    pub fn poll_event(&self) -> Option<WorkerEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Blocking wait for the next result, bounded by `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Frames dropped at the handoff because the worker was busy.
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Stop the worker: no new frames are accepted, any in-flight frame
    /// finishes, and the thread is joined with a bounded wait.
    ///
    /// On timeout the thread is detached (Rust offers no forced kill) and
    /// an error returned — the caller's thread never hangs; the detached
    /// worker exits on its own once its current frame completes.
    pub fn shutdown(mut self, timeout: Duration) -> Result<(), PipelineError> {
        let _ = self.control_tx.send(Control::Stop);
        // Close the frame channel so a worker blocked on recv wakes up
        let (closed_tx, _) = bounded(1);
        drop(std::mem::replace(&mut self.frame_tx, closed_tx));

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::error!("detection worker panicked during shutdown");
                    }
                }
                Ok(())
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                log::error!(
                    "detection worker did not stop within {}ms; detaching",
                    timeout.as_millis()
                );
                self.handle.take(); // detach
                Err(PipelineError::ShutdownTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn run_worker(
    config: PipelineConfig,
    pause_check: Option<PauseCheck>,
    frame_rx: Receiver<(Frame, f64)>,
    control_rx: Receiver<Control>,
    event_tx: Sender<WorkerEvent>,
) {
    let mut pipeline = DetectionPipeline::new(config);

    loop {
        // Drain pending control first so a reconfigure or stop that
        // arrived during the previous frame applies before the next one
        loop {
            match control_rx.try_recv() {
                Ok(Control::Reconfigure(config)) => pipeline.reconfigure(config),
                Ok(Control::Reset) => pipeline.reset(),
                Ok(Control::Stop) => return,
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }
        }

        crossbeam_channel::select! {
            recv(control_rx) -> msg => match msg {
                Ok(Control::Reconfigure(config)) => pipeline.reconfigure(config),
                Ok(Control::Reset) => pipeline.reset(),
                Ok(Control::Stop) | Err(_) => return,
            },
            recv(frame_rx) -> msg => {
                let Ok((frame, timestamp)) = msg else {
                    return; // submitting side is gone
                };

                if pause_check.as_ref().is_some_and(|paused| paused()) {
                    continue;
                }

                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.process_frame(&frame, timestamp)
                }));

                let event = match result {
                    Ok(Ok(output)) => WorkerEvent::Processed {
                        frame: output.frame,
                        detections: output.detections,
                        timings: output.timings,
                        camera_moving: output.camera_moving,
                    },
                    Ok(Err(e)) => WorkerEvent::Error {
                        message: e.to_string(),
                    },
                    Err(panic_payload) => {
                        let message = panic_message(&panic_payload);
                        log::error!("detection stage panicked: {message}");
                        WorkerEvent::Error {
                            message: PipelineError::StagePanicked(message).to_string(),
                        }
                    }
                };

                if event_tx.send(event).is_err() {
                    return; // receiving side is gone
                }
            }
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::shared::config::RenderShape;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn quiet_config() -> PipelineConfig {
        PipelineConfig {
            enable_motion: true,
            enable_color_quantization: false,
            enable_temporal_voting: false,
            render_shape: RenderShape::Off,
            ..Default::default()
        }
    }

    fn frame(index: usize) -> Frame {
        Frame::new(vec![60; 32 * 32 * 3], 32, 32, 3, index)
    }

    #[test]
    fn test_submit_and_receive_result() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        assert!(worker.submit(frame(0), 0.0).unwrap());

        let event = worker.recv_event_timeout(TIMEOUT).expect("no result");
        match event {
            WorkerEvent::Processed {
                frame: out,
                detections,
                timings,
                camera_moving,
            } => {
                assert_eq!(out.width(), 32);
                assert!(detections.is_empty());
                assert!(timings.total_ms >= 0.0);
                assert!(!camera_moving);
            }
            WorkerEvent::Error { message } => panic!("unexpected error: {message}"),
        }
        worker.shutdown(TIMEOUT).unwrap();
    }

    #[test]
    fn test_results_arrive_in_submission_order() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        let mut submitted = Vec::new();
        for i in 0..20 {
            if worker.submit(frame(i), i as f64).unwrap() {
                submitted.push(i);
            }
            // Drain as we go so the result channel never backs up
            while let Some(event) = worker.poll_event() {
                record_index(&mut submitted, event);
            }
        }
        worker.shutdown(TIMEOUT).unwrap();
    }

    /// Helper for the ordering test: each received frame must be the
    /// oldest still-outstanding submission.
    fn record_index(outstanding: &mut Vec<usize>, event: WorkerEvent) {
        if let WorkerEvent::Processed { frame, .. } = event {
            assert!(!outstanding.is_empty());
            assert_eq!(frame.index(), outstanding.remove(0));
        }
    }

    #[test]
    fn test_busy_worker_drops_newest() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        let mut accepted = 0;
        for i in 0..50 {
            if worker.submit(frame(i), i as f64).unwrap() {
                accepted += 1;
            }
        }
        // With a single-slot handoff and no draining, most submissions drop
        assert!(accepted < 50);
        assert_eq!(worker.dropped_frames(), 50 - accepted);
        worker.shutdown(TIMEOUT).unwrap();
    }

    #[test]
    fn test_invalid_frame_reports_error_and_stream_continues() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        let empty = Frame::new(Vec::new(), 0, 0, 3, 0);
        worker.submit(empty, 0.0).unwrap();

        match worker.recv_event_timeout(TIMEOUT) {
            Some(WorkerEvent::Error { message }) => {
                assert!(message.contains("invalid frame"), "message: {message}");
            }
            other => panic!("expected error event, got {other:?}"),
        }

        // The next frame processes normally
        worker.submit(frame(1), 0.1).unwrap();
        assert!(matches!(
            worker.recv_event_timeout(TIMEOUT),
            Some(WorkerEvent::Processed { .. })
        ));
        worker.shutdown(TIMEOUT).unwrap();
    }

    #[test]
    fn test_paused_source_skips_processing() {
        let paused = Arc::new(AtomicBool::new(true));
        let paused_clone = paused.clone();
        let mut worker = FrameWorker::spawn(
            quiet_config(),
            Some(Box::new(move || paused_clone.load(Ordering::Relaxed))),
        );

        worker.submit(frame(0), 0.0).unwrap();
        // Paused: the frame is skipped and no event arrives
        assert!(worker
            .recv_event_timeout(Duration::from_millis(300))
            .is_none());

        paused.store(false, Ordering::Relaxed);
        worker.submit(frame(1), 0.1).unwrap();
        assert!(matches!(
            worker.recv_event_timeout(TIMEOUT),
            Some(WorkerEvent::Processed { .. })
        ));
        worker.shutdown(TIMEOUT).unwrap();
    }

    #[test]
    fn test_reconfigure_applies_to_later_frames() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        worker
            .reconfigure(PipelineConfig {
                enable_motion: false,
                ..quiet_config()
            })
            .unwrap();
        worker.submit(frame(0), 0.0).unwrap();
        assert!(matches!(
            worker.recv_event_timeout(TIMEOUT),
            Some(WorkerEvent::Processed { .. })
        ));
        worker.shutdown(TIMEOUT).unwrap();
    }

    #[test]
    fn test_shutdown_is_bounded_and_clean() {
        let worker = FrameWorker::spawn(quiet_config(), None);
        let start = std::time::Instant::now();
        worker.shutdown(TIMEOUT).unwrap();
        assert!(start.elapsed() < TIMEOUT);
    }

    #[test]
    fn test_submit_after_worker_gone_errors() {
        let mut worker = FrameWorker::spawn(quiet_config(), None);
        let _ = worker.control_tx.send(Control::Stop);
        // Give the worker a moment to exit, then the channel reports
        // disconnection (first send may still land in the buffer)
        let _ = worker.done_rx.recv_timeout(TIMEOUT);
        let first = worker.submit(frame(0), 0.0);
        let second = worker.submit(frame(1), 0.1);
        assert!(
            matches!(first, Err(PipelineError::WorkerUnavailable(_)))
                || matches!(second, Err(PipelineError::WorkerUnavailable(_)))
        );
    }
}
