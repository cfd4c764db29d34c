//! Streaming detection pipeline for aerial search-and-rescue video.
//!
//! The crate is organized by bounded context: `detection` holds the
//! detector algorithms and post-filters, `pipeline` the per-frame
//! orchestration and the worker thread, `video` the frame I/O boundary,
//! and `rendering` the overlay drawing. `imaging` is the shared CPU
//! pixel-processing layer the detectors build on.

pub mod detection;
pub mod imaging;
pub mod pipeline;
pub mod rendering;
pub mod shared;
pub mod video;
