use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::detection::{DetectedObject, Provenance};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: String, reason: String },
    #[error(transparent)]
    Model(#[from] crate::shared::model_resolver::ModelResolveError),
    #[error("no local inference engine available: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// One frame handed across the worker boundary to an execution engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    /// Packed RGB pixels, `width * height * 3` bytes.
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time, ms since the Unix epoch.
    pub timestamp: u64,
    pub frame_id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub detections: Vec<DetectedObject>,
    /// Milliseconds the engine spent on this request.
    pub processing_time: f64,
}

/// A loaded model plus the runtime that executes it.
///
/// Lives on the local backend's worker thread for the backend's whole
/// lifetime; `&mut self` because runtimes keep per-session scratch state.
pub trait InferenceEngine: Send {
    fn name(&self) -> &str;

    fn infer(&mut self, request: &InferenceRequest) -> Result<InferenceResponse, EngineError>;

    /// How batches from this engine should be labelled.
    fn provenance(&self) -> Provenance {
        Provenance::Inferred
    }
}

/// Builds an engine. Invoked on the worker thread, so slow model loading
/// never blocks the caller that created the backend.
pub type EngineFactory =
    Arc<dyn Fn() -> Result<Box<dyn InferenceEngine>, EngineError> + Send + Sync>;
