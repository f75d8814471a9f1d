pub mod backend_factory;
#[cfg(feature = "onnx")]
pub mod execution_provider;
pub mod local_backend;
#[cfg(feature = "onnx")]
pub mod onnx_engine;
pub mod placeholder_engine;
pub mod remote_backend;
pub(crate) mod worker;
pub mod yolo;
