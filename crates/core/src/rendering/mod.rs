pub mod detection_renderer;
pub mod draw;
