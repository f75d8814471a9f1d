use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::inference::domain::inference_backend::{CompletionSender, InferenceBackend};
use crate::inference::domain::inference_engine::{EngineError, EngineFactory, InferenceEngine};
use crate::inference::infrastructure::local_backend::LocalBackend;
use crate::inference::infrastructure::placeholder_engine::PlaceholderEngine;
use crate::inference::infrastructure::remote_backend::{RemoteBackend, RemoteConfig};
use crate::shared::constants::{BUNDLED_MODEL_DIR, DEFAULT_MODEL_NAME};
use crate::shared::detection::Provenance;
use crate::shared::model_resolver;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Model executed in-process on a worker thread.
    #[default]
    Local,
    /// Frames posted to an HTTP detection endpoint.
    Remote,
}

impl std::str::FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown backend mode: {other}")),
        }
    }
}

/// Create the backend for `mode`. Local backends build their engine with
/// `engine_factory` on the worker thread; remote backends ignore it.
pub fn create_backend(
    mode: BackendMode,
    remote: RemoteConfig,
    engine_factory: EngineFactory,
    completions: CompletionSender,
) -> Box<dyn InferenceBackend> {
    match mode {
        BackendMode::Local => Box::new(LocalBackend::spawn(engine_factory, completions)),
        BackendMode::Remote => Box::new(RemoteBackend::spawn(remote, completions)),
    }
}

/// Engine factory for the bundled YOLO model, resolved from `model_path`,
/// the user model directory or the bundled model directory.
pub fn default_engine_factory(model_path: Option<PathBuf>, confidence: f64) -> EngineFactory {
    Arc::new(move || load_default_engine(model_path.as_deref(), confidence))
}

/// Engine factory whose engine reports the fixed placeholder detections.
pub fn placeholder_engine_factory(provenance: Provenance) -> EngineFactory {
    Arc::new(move || Ok(Box::new(PlaceholderEngine::new(provenance)) as Box<dyn InferenceEngine>))
}

fn load_default_engine(
    model_path: Option<&Path>,
    confidence: f64,
) -> Result<Box<dyn InferenceEngine>, EngineError> {
    let path = model_resolver::resolve(
        DEFAULT_MODEL_NAME,
        model_path,
        Some(Path::new(BUNDLED_MODEL_DIR)),
    )?;
    load_onnx(&path, confidence)
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, confidence: f64) -> Result<Box<dyn InferenceEngine>, EngineError> {
    use crate::inference::infrastructure::onnx_engine::OnnxEngine;

    Ok(Box::new(OnnxEngine::load(path, confidence)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _confidence: f64) -> Result<Box<dyn InferenceEngine>, EngineError> {
    Err(EngineError::Unavailable(format!(
        "found {} but this build has no ONNX runtime (enable the `onnx` feature)",
        path.display()
    )))
}
