use std::path::Path;
use std::time::Instant;

use crate::inference::domain::inference_engine::{
    EngineError, InferenceEngine, InferenceRequest, InferenceResponse,
};
use crate::inference::infrastructure::execution_provider::preferred_execution_providers;
use crate::inference::infrastructure::yolo::{self, COCO_LABELS};

/// Model input resolution used when the model declares a dynamic shape.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// YOLOv8-style COCO detector running on ONNX Runtime.
pub struct OnnxEngine {
    session: ort::session::Session,
    input_size: u32,
    confidence: f64,
}

impl OnnxEngine {
    /// Loads the model and reads its square input size from the NCHW input
    /// shape.
    pub fn load(model_path: &Path, confidence: f64) -> Result<Self, EngineError> {
        let session = build_session(model_path).map_err(|e| EngineError::Load {
            path: model_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!(
            "Loaded ONNX model {} ({input_size}x{input_size} input)",
            model_path.display()
        );

        Ok(Self {
            session,
            input_size,
            confidence,
        })
    }
}

fn build_session(model_path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let session = ort::session::Session::builder()?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?;
    Ok(session)
}

impl InferenceEngine for OnnxEngine {
    fn name(&self) -> &str {
        "onnx"
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<InferenceResponse, EngineError> {
        let started = Instant::now();
        let (tensor, letterbox) = yolo::letterbox(
            &request.image_data,
            request.width,
            request.height,
            self.input_size,
        )
        .ok_or_else(|| {
            EngineError::Inference(format!(
                "frame {} is not {}x{} RGB",
                request.frame_id, request.width, request.height
            ))
        })?;

        let input = ort::value::Tensor::from_array(tensor)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        if outputs.len() == 0 {
            return Err(EngineError::Inference("model produced no outputs".into()));
        }
        let predictions = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let detections = yolo::decode(predictions, &letterbox, self.confidence, &COCO_LABELS)
            .map_err(EngineError::Inference)?;

        Ok(InferenceResponse {
            detections,
            processing_time: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
