use crate::inference::domain::inference_engine::{
    EngineError, InferenceEngine, InferenceRequest, InferenceResponse,
};
use crate::shared::detection::{DetectedObject, Provenance};

/// Fixed stand-in detections: a person with a laptop and a cup.
///
/// Used as the remote fallback batch and by the mock-detection strategy.
/// Deterministic so consumers can tell it apart from real output in tests.
pub fn placeholder_objects() -> Vec<DetectedObject> {
    vec![
        DetectedObject::new("person", 0.9, [0.30, 0.10, 0.70, 0.95]),
        DetectedObject::new("laptop", 0.8, [0.05, 0.55, 0.35, 0.90]),
        DetectedObject::new("cup", 0.6, [0.75, 0.60, 0.88, 0.80]),
    ]
}

/// Engine that reports [`placeholder_objects`] for every frame.
pub struct PlaceholderEngine {
    provenance: Provenance,
}

impl PlaceholderEngine {
    pub fn new(provenance: Provenance) -> Self {
        Self { provenance }
    }
}

impl Default for PlaceholderEngine {
    fn default() -> Self {
        Self::new(Provenance::Mock)
    }
}

impl InferenceEngine for PlaceholderEngine {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn infer(&mut self, _request: &InferenceRequest) -> Result<InferenceResponse, EngineError> {
        Ok(InferenceResponse {
            detections: placeholder_objects(),
            processing_time: 0.0,
        })
    }

    fn provenance(&self) -> Provenance {
        self.provenance
    }
}
