use std::sync::Arc;

use crate::inference::domain::backend_state::{BackendState, BackendStateCell};
use crate::inference::domain::inference_backend::{
    BackendError, CompletionSender, InferenceBackend,
};
use crate::inference::domain::inference_engine::{
    EngineFactory, InferenceEngine, InferenceRequest,
};
use crate::inference::infrastructure::worker::{BackendWorker, FrameJob, InitError};
use crate::shared::clock::now_ms;
use crate::shared::detection::{DetectionBatch, FrameTiming};
use crate::shared::frame::Frame;

/// Runs an [`InferenceEngine`] on a dedicated worker thread.
///
/// The engine is built by the factory on the worker right after
/// construction; until that finishes the backend reports `Uninitialized`
/// and refuses frames with `NotReady`. If the factory fails the backend
/// goes straight to `Stopped`.
pub struct LocalBackend {
    worker: BackendWorker,
}

impl LocalBackend {
    pub fn spawn(factory: EngineFactory, completions: CompletionSender) -> Self {
        let job = LocalJob {
            factory,
            engine: None,
        };
        Self {
            worker: BackendWorker::spawn("local", job, completions),
        }
    }
}

impl InferenceBackend for LocalBackend {
    fn name(&self) -> &'static str {
        self.worker.name()
    }

    fn state(&self) -> BackendState {
        self.worker.state()
    }

    fn state_handle(&self) -> Arc<BackendStateCell> {
        self.worker.state_handle()
    }

    fn submit(&mut self, frame: Frame) -> Result<(), BackendError> {
        self.worker.submit(frame)
    }

    fn stop(&mut self) {
        self.worker.stop();
    }
}

struct LocalJob {
    factory: EngineFactory,
    engine: Option<Box<dyn InferenceEngine>>,
}

impl FrameJob for LocalJob {
    fn init(&mut self) -> Result<(), InitError> {
        let engine = (self.factory)()?;
        log::info!("Loaded {} inference engine", engine.name());
        self.engine = Some(engine);
        Ok(())
    }

    fn process(&mut self, frame: Frame) -> Option<DetectionBatch> {
        let engine = self.engine.as_mut()?;
        let recv_ts = now_ms();
        let frame_id = frame.frame_id();
        let capture_ts = frame.capture_ts();
        let request = InferenceRequest {
            width: frame.width(),
            height: frame.height(),
            timestamp: capture_ts as u64,
            frame_id,
            image_data: frame.into_data(),
        };

        match engine.infer(&request) {
            Ok(response) => {
                let processing_time = response.processing_time.max(0.0);
                let timing =
                    FrameTiming::bounded(capture_ts, recv_ts, recv_ts + processing_time);
                Some(DetectionBatch::from_objects(
                    frame_id,
                    timing,
                    processing_time,
                    engine.provenance(),
                    response.detections,
                ))
            }
            Err(e) => {
                log::warn!("{} failed on frame {frame_id}: {e}", engine.name());
                None
            }
        }
    }
}
