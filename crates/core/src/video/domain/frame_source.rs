use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// A live stream or file-playback source of timestamped frames.
///
/// Implementations handle I/O details (codec, container, transport); the
/// pipeline sees only `(frame, timestamp)` pairs at the source's native
/// rate. Pause and seek are meaningful for file playback and no-ops for
/// live sources.
pub trait FrameSource: Send {
    /// Opens the source and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    /// Next frame with its timestamp in seconds, `None` at end of stream.
    fn next_frame(&mut self)
        -> Option<Result<(Frame, f64), Box<dyn std::error::Error>>>;

    /// Playback pause flag. The worker consults this before each frame
    /// and skips processing entirely while paused.
    fn is_paused(&self) -> bool;

    fn set_paused(&mut self, paused: bool);

    /// Jump to the given timestamp (seconds). File mode only.
    fn seek(&mut self, timestamp: f64) -> Result<(), Box<dyn std::error::Error>>;

    /// Releases any resources held by the source.
    fn close(&mut self);
}
