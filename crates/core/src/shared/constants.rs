/// Gray-level difference above which a pixel counts as "changed" for the
/// camera-movement check. Intentionally lower than typical motion
/// thresholds: global scene change shows up as many small differences.
pub const CAMERA_MOVEMENT_DIFF_THRESHOLD: u8 = 20;

/// The camera-movement gate releases when the moving-pixel fraction drops
/// below `threshold * CAMERA_MOVEMENT_RELEASE_RATIO` (hysteresis so a
/// fraction sitting at the threshold cannot flicker the gate every frame).
pub const CAMERA_MOVEMENT_RELEASE_RATIO: f64 = 0.8;

/// Centroid distance (pixels) within which a detection is associated with
/// an existing temporal bucket.
pub const TEMPORAL_MATCH_DISTANCE: f64 = 50.0;

/// A single quantized color bin may cover at most this fraction of the
/// frame and still count as rare, whatever the percentile says.
pub const RARITY_ABSOLUTE_MAX_FRACTION: f64 = 0.05;

/// KNN background model: samples kept per pixel.
pub const KNN_SAMPLES_PER_PIXEL: usize = 10;

/// KNN background model: gray-level match radius and the neighbor count
/// required to call a pixel background.
pub const KNN_MATCH_RADIUS: u8 = 20;
pub const KNN_REQUIRED_NEIGHBORS: usize = 2;

/// Capacity of the worker's result channel.
pub const WORKER_RESULT_CAPACITY: usize = 8;
