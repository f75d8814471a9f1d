pub mod backend_state;
pub mod inference_backend;
pub mod inference_engine;
