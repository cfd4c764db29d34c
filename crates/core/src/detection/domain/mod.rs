pub mod camera_guard;
pub mod fusion;
pub mod geometric_filter;
pub mod temporal_voting;
