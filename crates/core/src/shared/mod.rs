pub mod clock;
pub mod constants;
pub mod detection;
pub mod frame;
pub mod model_resolver;
