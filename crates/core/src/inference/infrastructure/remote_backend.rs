use std::sync::Arc;
use std::time::Duration;

use image::ImageEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::domain::backend_state::{BackendState, BackendStateCell};
use crate::inference::domain::inference_backend::{
    BackendError, CompletionSender, InferenceBackend,
};
use crate::inference::infrastructure::placeholder_engine::placeholder_objects;
use crate::inference::infrastructure::worker::{BackendWorker, FrameJob, InitError};
use crate::shared::clock::now_ms;
use crate::shared::detection::{DetectedObject, DetectionBatch, FrameTiming, Provenance};
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("failed to encode frame as JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint returned HTTP {0}")]
    Status(u16),
    #[error("undecodable response body: {0}")]
    Decode(String),
}

/// What the remote backend delivers when the endpoint cannot answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// The fixed placeholder detections.
    #[default]
    Placeholder,
    /// An empty batch.
    Empty,
}

impl std::str::FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "placeholder" => Ok(Self::Placeholder),
            "empty" => Ok(Self::Empty),
            other => Err(format!("unknown fallback strategy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub endpoint_url: String,
    pub timeout: Duration,
    pub jpeg_quality: u8,
    pub fallback: FallbackStrategy,
}

/// Success body of the detection endpoint. Receipt and inference times are
/// the server's clock, in ms since the Unix epoch.
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<DetectedObject>,
    recv_ts: Option<f64>,
    inference_ts: Option<f64>,
}

/// Posts each frame as a JPEG to an HTTP detection endpoint.
///
/// Requests run on the backend's worker thread with the configured
/// timeout. Failures never reach the caller: the frame still completes,
/// with a batch marked [`Provenance::Fallback`].
pub struct RemoteBackend {
    worker: BackendWorker,
}

impl RemoteBackend {
    pub fn spawn(config: RemoteConfig, completions: CompletionSender) -> Self {
        let job = RemoteJob {
            config,
            client: None,
        };
        Self {
            worker: BackendWorker::spawn("remote", job, completions),
        }
    }
}

impl InferenceBackend for RemoteBackend {
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

struct RemoteJob {
    config: RemoteConfig,
    client: Option<reqwest::blocking::Client>,
}

impl RemoteJob {
    fn detect(
        &self,
        client: &reqwest::blocking::Client,
        frame: &Frame,
    ) -> Result<DetectResponse, RemoteError> {
        let jpeg = encode_jpeg(frame, self.config.jpeg_quality)?;
        let image = reqwest::blocking::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("image", image)
            .text("timestamp", (frame.capture_ts() as u64).to_string());

        let response = client
            .post(&self.config.endpoint_url)
            .multipart(form)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        response
            .json::<DetectResponse>()
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn fallback_batch(&self, frame: &Frame, send_ts: f64) -> DetectionBatch {
        let done_ts = now_ms();
        let objects = match self.config.fallback {
            FallbackStrategy::Placeholder => placeholder_objects(),
            FallbackStrategy::Empty => Vec::new(),
        };
        DetectionBatch::from_objects(
            frame.frame_id(),
            FrameTiming::bounded(frame.capture_ts(), send_ts, done_ts),
            done_ts - send_ts,
            Provenance::Fallback,
            objects,
        )
    }
}

impl FrameJob for RemoteJob {
    fn init(&mut self) -> Result<(), InitError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()?;
        log::info!(
            "Remote detection endpoint: {} (timeout {:?})",
            self.config.endpoint_url,
            self.config.timeout
        );
        self.client = Some(client);
        Ok(())
    }

    fn process(&mut self, frame: Frame) -> Option<DetectionBatch> {
        let client = self.client.as_ref()?;
        let send_ts = now_ms();

        match self.detect(client, &frame) {
            Ok(response) => {
                let received_ts = now_ms();
                let recv_ts = response.recv_ts.unwrap_or(send_ts);
                let processing_time = match (response.recv_ts, response.inference_ts) {
                    (Some(start), Some(end)) => end - start,
                    _ => received_ts - send_ts,
                };
                Some(DetectionBatch::from_objects(
                    frame.frame_id(),
                    FrameTiming::bounded(frame.capture_ts(), recv_ts, received_ts),
                    processing_time,
                    Provenance::Inferred,
                    response.detections,
                ))
            }
            Err(e) => {
                log::warn!(
                    "Remote detection failed for frame {}: {e}; delivering fallback",
                    frame.frame_id()
                );
                Some(self.fallback_batch(&frame, send_ts))
            }
        }
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality).write_image(
        frame.data(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::inference::domain::inference_backend::Completion;

    /// Fake detection endpoint driven from synchronous tests.
    struct Endpoint {
        server: MockServer,
        runtime: tokio::runtime::Runtime,
    }

    impl Endpoint {
        fn start() -> Self {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let server = runtime.block_on(MockServer::start());
            Self { server, runtime }
        }

        fn respond_with(&self, template: ResponseTemplate) {
            self.runtime.block_on(
                Mock::given(method("POST"))
                    .and(path("/api/detect"))
                    .respond_with(template)
                    .mount(&self.server),
            );
        }

        fn url(&self) -> String {
            format!("{}/api/detect", self.server.uri())
        }
    }

    fn config(url: String, timeout_ms: u64, fallback: FallbackStrategy) -> RemoteConfig {
        RemoteConfig {
            endpoint_url: url,
            timeout: Duration::from_millis(timeout_ms),
            jpeg_quality: 80,
            fallback,
        }
    }

    fn gradient_frame(id: u64) -> Frame {
        let (w, h) = (32u32, 24u32);
        let data = (0..w * h * 3).map(|i| (i % 251) as u8).collect();
        // Captured a second ago so server-reported times fall before now.
        Frame::new(data, w, h, id, now_ms() - 1000.0)
    }

    /// Submits one frame once the backend is ready and waits for its batch.
    fn run_one(config: RemoteConfig, frame: Frame) -> Completion {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut backend = RemoteBackend::spawn(config, CompletionSender::new(tx, 2));
        let deadline = Instant::now() + Duration::from_secs(2);
        while backend.state() != BackendState::Ready {
            assert!(Instant::now() < deadline, "remote backend never ready");
            std::thread::sleep(Duration::from_millis(1));
        }
        backend.submit(frame).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        backend.stop();
        completion
    }

    #[test]
    fn test_jpeg_encoding_produces_jpeg_magic() {
        let jpeg = encode_jpeg(&gradient_frame(1), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_success_uses_endpoint_detections_and_receipt_time() {
        let endpoint = Endpoint::start();
        let frame = gradient_frame(11);
        let capture_ts = frame.capture_ts();
        endpoint.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "detections": [
                {"label": "dog", "score": 0.75, "xmin": 0.1, "ymin": 0.2, "xmax": 0.5, "ymax": 0.6}
            ],
            "recv_ts": capture_ts + 5.0,
            "inference_ts": capture_ts + 9.0
        })));

        let completion = run_one(
            config(endpoint.url(), 2000, FallbackStrategy::Placeholder),
            frame,
        );

        assert_eq!(completion.generation, 2);
        let batch = completion.batch;
        assert_eq!(batch.provenance(), Provenance::Inferred);
        assert_eq!(batch.frame_id(), 11);
        assert_eq!(batch.len(), 1);
        let d = &batch.detections()[0];
        assert_eq!(d.label(), "dog");
        assert!(d.is_well_formed());
        approx::assert_abs_diff_eq!(d.recv_ts(), capture_ts + 5.0, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(batch.processing_time_ms(), 4.0, epsilon = 1e-2);
    }

    #[test]
    fn test_http_500_yields_placeholder_fallback() {
        let endpoint = Endpoint::start();
        endpoint.respond_with(ResponseTemplate::new(500));

        let batch = run_one(
            config(endpoint.url(), 2000, FallbackStrategy::Placeholder),
            gradient_frame(4),
        )
        .batch;

        assert_eq!(batch.provenance(), Provenance::Fallback);
        assert_eq!(batch.frame_id(), 4);
        assert!(!batch.is_empty());
        assert!(batch.detections().iter().all(|d| d.is_well_formed()));
    }

    #[test]
    fn test_timeout_yields_fallback() {
        let endpoint = Endpoint::start();
        endpoint.respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"detections": []}))
                .set_delay(Duration::from_millis(500)),
        );

        let started = Instant::now();
        let batch = run_one(
            config(endpoint.url(), 100, FallbackStrategy::Placeholder),
            gradient_frame(9),
        )
        .batch;

        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(batch.provenance(), Provenance::Fallback);
        assert!(!batch.is_empty());
        let timing = batch.timing();
        assert!(timing.capture_ts() <= timing.recv_ts());
        assert!(timing.recv_ts() <= timing.inference_ts());
    }

    #[test]
    fn test_undecodable_body_with_empty_strategy() {
        let endpoint = Endpoint::start();
        endpoint.respond_with(ResponseTemplate::new(200).set_body_string("not json"));

        let batch = run_one(
            config(endpoint.url(), 2000, FallbackStrategy::Empty),
            gradient_frame(2),
        )
        .batch;

        assert_eq!(batch.provenance(), Provenance::Fallback);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_missing_server_times_fall_back_to_send_time() {
        let endpoint = Endpoint::start();
        endpoint.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "detections": [
                {"label": "cat", "score": 1.4, "xmin": -0.2, "ymin": 0.0, "xmax": 0.5, "ymax": 1.3}
            ]
        })));
        let frame = gradient_frame(5);
        let capture_ts = frame.capture_ts();

        let batch = run_one(
            config(endpoint.url(), 2000, FallbackStrategy::Placeholder),
            frame,
        )
        .batch;

        assert_eq!(batch.provenance(), Provenance::Inferred);
        let d = &batch.detections()[0];
        assert!(d.is_well_formed());
        assert_eq!(d.bbox(), [0.0, 0.0, 0.5, 1.0]);
        assert!(d.recv_ts() >= capture_ts);
    }

    #[test]
    fn test_unreachable_endpoint_yields_fallback() {
        // Port 9 (discard) is closed on test machines.
        let batch = run_one(
            config("http://127.0.0.1:9/api/detect".to_string(), 500, FallbackStrategy::Placeholder),
            gradient_frame(1),
        )
        .batch;
        assert_eq!(batch.provenance(), Provenance::Fallback);
    }

    #[test]
    fn test_fallback_strategy_parses() {
        assert_eq!("empty".parse::<FallbackStrategy>(), Ok(FallbackStrategy::Empty));
        assert!("bogus".parse::<FallbackStrategy>().is_err());
    }
}
