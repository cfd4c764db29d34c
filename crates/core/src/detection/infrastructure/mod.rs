pub mod background_model;
pub mod color_anomaly_detector;
pub mod motion_detector;
