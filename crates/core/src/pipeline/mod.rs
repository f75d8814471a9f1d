pub mod detection_session;
pub mod pipeline_logger;
pub mod result_sink;
pub mod session_config;
