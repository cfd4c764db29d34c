pub mod detection_pipeline;
pub mod infrastructure;
pub mod metrics;
pub mod pipeline_logger;
