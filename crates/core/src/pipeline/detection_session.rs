use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use thiserror::Error;

use crate::capture::domain::video_source::SharedVideoSource;
use crate::inference::domain::backend_state::{BackendState, BackendStateCell};
use crate::inference::domain::inference_backend::{
    BackendError, Completion, CompletionSender, InferenceBackend,
};
use crate::inference::domain::inference_engine::EngineFactory;
use crate::inference::infrastructure::backend_factory::{
    create_backend, default_engine_factory, placeholder_engine_factory, BackendMode,
};
use crate::inference::infrastructure::placeholder_engine::placeholder_objects;
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::pipeline::result_sink::{PublishOutcome, ResultSink};
use crate::pipeline::session_config::{ConfigError, MockDetections, SessionConfig};
use crate::sampling::frame_sampler::{FrameSampler, SampledFrames};
use crate::shared::clock::now_ms;
use crate::shared::detection::{Detection, DetectionBatch, FrameTiming, Provenance};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("video stream is absent or not live")]
    InvalidStream,
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// What a renderer needs to draw the current frame's boxes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSnapshot {
    pub detections: Vec<Detection>,
    pub is_processing: bool,
    pub provenance: Option<Provenance>,
    pub frame_id: Option<u64>,
}

/// Counters for the current (or last) run. Reset by `start`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub sampled: usize,
    pub submitted: usize,
    pub dropped_busy: usize,
    pub dropped_not_ready: usize,
    pub completed: usize,
    pub out_of_order: usize,
    pub stale_discarded: usize,
    pub fallbacks: usize,
}

#[derive(Default)]
struct Counters {
    sampled: AtomicUsize,
    submitted: AtomicUsize,
    dropped_busy: AtomicUsize,
    dropped_not_ready: AtomicUsize,
    completed: AtomicUsize,
    out_of_order: AtomicUsize,
    stale_discarded: AtomicUsize,
    fallbacks: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> SessionStats {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        SessionStats {
            sampled: load(&self.sampled),
            submitted: load(&self.submitted),
            dropped_busy: load(&self.dropped_busy),
            dropped_not_ready: load(&self.dropped_not_ready),
            completed: load(&self.completed),
            out_of_order: load(&self.out_of_order),
            stale_discarded: load(&self.stale_discarded),
            fallbacks: load(&self.fallbacks),
        }
    }
}

type SharedLogger = Arc<Mutex<Box<dyn PipelineLogger>>>;

fn log_to(logger: &SharedLogger, f: impl FnOnce(&mut dyn PipelineLogger)) {
    let mut guard = logger
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut **guard);
}

/// Threads and handles of one running sampling loop.
struct RunningLoop {
    generation: u64,
    stop_tx: Sender<()>,
    dispatcher: JoinHandle<()>,
    collector: JoinHandle<()>,
    backend_state: Arc<BackendStateCell>,
}

/// Drives one video stream through sampling, inference and result delivery.
///
/// `start` spins up three threads: the sampler-driven dispatcher, the
/// backend's worker and a collector that publishes completions to the
/// [`ResultSink`]. `stop` advances the sink generation first, so anything
/// still in flight is discarded, then joins all of them. At most one loop
/// runs at a time.
pub struct DetectionSession {
    config: SessionConfig,
    engine_factory: Option<EngineFactory>,
    sink: Arc<ResultSink>,
    counters: Arc<Counters>,
    logger: SharedLogger,
    running: Option<RunningLoop>,
}

impl DetectionSession {
    pub fn new(config: SessionConfig) -> Self {
        let sink = Arc::new(ResultSink::new(config.ordering));
        Self {
            config,
            engine_factory: None,
            sink,
            counters: Arc::new(Counters::default()),
            logger: Arc::new(Mutex::new(Box::new(NullPipelineLogger))),
            running: None,
        }
    }

    /// Replaces the default ONNX engine for local mode.
    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = Arc::new(Mutex::new(logger));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.running.is_some() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Starts sampling `stream`. A running loop is fully stopped first.
    ///
    /// Fails without touching the session if the configuration is invalid
    /// or the stream is not live. The stream is only read, never closed.
    pub fn start(&mut self, stream: SharedVideoSource) -> Result<(), SessionError> {
        self.config.validate()?;
        if !stream.is_live() {
            return Err(SessionError::InvalidStream);
        }
        self.stop();

        let generation = self.sink.advance_generation();
        self.counters = Arc::new(Counters::default());

        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<Completion>();
        let backend = self.build_backend(CompletionSender::new(completion_tx, generation));
        let backend_state = backend.state_handle();
        let backend_name = backend.name();

        if self.config.mock_detections == MockDetections::UntilFirstResult {
            self.sink.publish(generation, placeholder_batch());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let sampler = FrameSampler::new(
            self.config.target_fps,
            self.config.frame_width,
            self.config.frame_height,
        );
        let interval_ms = sampler.interval().as_secs_f64() * 1000.0;
        let frames = sampler.frames(stream, stop_rx);

        let dispatcher = spawn_dispatcher(frames, backend, self.counters.clone());
        let collector = spawn_collector(
            completion_rx,
            self.sink.clone(),
            self.counters.clone(),
            self.logger.clone(),
        );

        log_to(&self.logger, |logger| {
            logger.info(&format!(
                "Session {generation} started: {backend_name} backend, {} fps ({interval_ms:.1}ms), {}x{}",
                self.config.target_fps, self.config.frame_width, self.config.frame_height
            ))
        });
        self.running = Some(RunningLoop {
            generation,
            stop_tx,
            dispatcher,
            collector,
            backend_state,
        });
        Ok(())
    }

    /// Stops the loop, tears down the backend and clears the retained
    /// result. Blocks for at most the frame currently in flight, whose
    /// result is discarded. No-op when idle.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.sink.advance_generation();
        let _ = running.stop_tx.send(());
        drop(running.stop_tx);

        if running.dispatcher.join().is_err() {
            log::error!("Session dispatcher thread panicked");
        }
        if running.collector.join().is_err() {
            log::error!("Session collector thread panicked");
        }

        let stats = self.stats();
        log_to(&self.logger, |logger| {
            logger.metric("dropped_busy", stats.dropped_busy as f64);
            logger.metric("dropped_not_ready", stats.dropped_not_ready as f64);
            logger.metric("stale_discarded", stats.stale_discarded as f64);
            logger.info(&format!(
                "Session {} stopped: {} sampled, {} submitted, {} completed",
                running.generation, stats.sampled, stats.submitted, stats.completed
            ));
        });
    }

    /// Latest published detections plus whether a frame is in flight.
    pub fn snapshot(&self) -> DetectionSnapshot {
        let latest = self.sink.latest();
        let is_processing = self
            .running
            .as_ref()
            .is_some_and(|r| r.backend_state.load() == BackendState::Busy);
        DetectionSnapshot {
            detections: latest
                .as_ref()
                .map(|b| b.detections().to_vec())
                .unwrap_or_default(),
            is_processing,
            provenance: latest.as_ref().map(|b| b.provenance()),
            frame_id: latest.as_ref().map(|b| b.frame_id()),
        }
    }

    pub fn latest(&self) -> Option<Arc<DetectionBatch>> {
        self.sink.latest()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Every batch published from now on, across restarts.
    pub fn subscribe(&self) -> Receiver<Arc<DetectionBatch>> {
        self.sink.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    /// Emits the logger's end-of-run summary.
    pub fn log_summary(&self) {
        log_to(&self.logger, |logger| logger.summary());
    }

    fn build_backend(&self, completions: CompletionSender) -> Box<dyn InferenceBackend> {
        let (mode, factory) = match self.config.mock_detections {
            MockDetections::Always => (
                BackendMode::Local,
                placeholder_engine_factory(Provenance::Mock),
            ),
            MockDetections::Off | MockDetections::UntilFirstResult => (
                self.config.mode,
                self.engine_factory.clone().unwrap_or_else(|| {
                    default_engine_factory(self.config.model_path.clone(), self.config.confidence)
                }),
            ),
        };
        create_backend(mode, self.config.remote_config(), factory, completions)
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frame 0 never comes from the sampler, so any real batch replaces this.
fn placeholder_batch() -> DetectionBatch {
    let now = now_ms();
    DetectionBatch::from_objects(
        0,
        FrameTiming::bounded(now, now, now),
        0.0,
        Provenance::Mock,
        placeholder_objects(),
    )
}

fn spawn_dispatcher(
    frames: SampledFrames,
    mut backend: Box<dyn InferenceBackend>,
    counters: Arc<Counters>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame in frames {
            Counters::bump(&counters.sampled);
            let frame_id = frame.frame_id();
            match backend.submit(frame) {
                Ok(()) => {
                    Counters::bump(&counters.submitted);
                }
                Err(BackendError::Busy) => {
                    Counters::bump(&counters.dropped_busy);
                    log::trace!("Frame {frame_id} dropped: backend busy");
                }
                Err(BackendError::NotReady) => {
                    Counters::bump(&counters.dropped_not_ready);
                    log::trace!("Frame {frame_id} dropped: backend not ready");
                }
                Err(BackendError::Stopped) => {
                    log::error!(
                        "{} backend stopped while the session is running; dispatch halted",
                        backend.name()
                    );
                    break;
                }
            }
        }
        backend.stop();
    })
}

fn spawn_collector(
    completions: Receiver<Completion>,
    sink: Arc<ResultSink>,
    counters: Arc<Counters>,
    logger: SharedLogger,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for Completion { generation, batch } in completions {
            let timing = batch.timing();
            let processing_ms = batch.processing_time_ms();
            let provenance = batch.provenance();

            match sink.publish(generation, batch) {
                PublishOutcome::Published => {
                    let completed = Counters::bump(&counters.completed);
                    if provenance == Provenance::Fallback {
                        Counters::bump(&counters.fallbacks);
                    }
                    let sampled = counters.sampled.load(Ordering::Relaxed);
                    log_to(&logger, |logger| {
                        logger.timing("inference", processing_ms);
                        logger.timing("latency", timing.inference_ts() - timing.capture_ts());
                        logger.progress(completed, sampled);
                    });
                }
                PublishOutcome::OutOfOrder => {
                    Counters::bump(&counters.out_of_order);
                }
                PublishOutcome::Stale => {
                    Counters::bump(&counters.stale_discarded);
                    log::debug!("Discarded late completion from session {generation}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use crate::capture::domain::video_source::VideoSource;
    use crate::capture::infrastructure::synthetic_source::SyntheticVideoSource;
    use crate::inference::domain::inference_engine::{
        EngineError, InferenceEngine, InferenceRequest, InferenceResponse,
    };
    use crate::shared::detection::DetectedObject;

    /// Reports one `person` per frame after `delay`, tracking concurrency.
    struct StubEngine {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl InferenceEngine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }

        fn infer(&mut self, _request: &InferenceRequest) -> Result<InferenceResponse, EngineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(InferenceResponse {
                detections: vec![DetectedObject::new("person", 0.9, [0.2, 0.1, 0.6, 0.9])],
                processing_time: self.delay.as_secs_f64() * 1000.0,
            })
        }
    }

    fn stub_factory(delay: Duration, peak: Arc<AtomicUsize>) -> EngineFactory {
        let in_flight = Arc::new(AtomicUsize::new(0));
        Arc::new(move || {
            Ok(Box::new(StubEngine {
                delay,
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            }) as Box<dyn InferenceEngine>)
        })
    }

    fn config(target_fps: f64) -> SessionConfig {
        SessionConfig {
            target_fps,
            frame_width: 64,
            frame_height: 48,
            ..Default::default()
        }
    }

    fn session(target_fps: f64, delay: Duration) -> (DetectionSession, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let session = DetectionSession::new(config(target_fps))
            .with_engine_factory(stub_factory(delay, peak.clone()));
        (session, peak)
    }

    fn source() -> Arc<SyntheticVideoSource> {
        Arc::new(SyntheticVideoSource::new(128, 96))
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_end_to_end_person_batches() {
        let (mut session, _) = session(15.0, Duration::from_millis(20));
        let batches = session.subscribe();

        session.start(source()).unwrap();
        std::thread::sleep(Duration::from_millis(1050));
        session.stop();

        let received: Vec<_> = batches.try_iter().collect();
        assert!(received.len() >= 10, "only {} batches", received.len());
        for batch in &received {
            assert_eq!(batch.len(), 1);
            let d = &batch.detections()[0];
            assert_eq!(d.label(), "person");
            assert_eq!(d.frame_id(), batch.frame_id());
            assert!(d.is_well_formed());
        }
        assert!(received.windows(2).all(|w| w[0].frame_id() < w[1].frame_id()));
    }

    #[test]
    fn test_fast_sampling_keeps_one_frame_in_flight() {
        let (mut session, peak) = session(30.0, Duration::from_millis(100));

        session.start(source()).unwrap();
        std::thread::sleep(Duration::from_millis(700));
        session.stop();

        let stats = session.stats();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(stats.dropped_busy > 0);
        assert!(stats.submitted < stats.sampled);
    }

    #[test]
    fn test_start_twice_runs_a_single_loop() {
        let (mut session, _) = session(20.0, Duration::ZERO);
        let stream = source();

        session.start(stream.clone()).unwrap();
        let first = session.generation();
        session.start(stream.clone()).unwrap();
        assert!(session.generation() > first);
        assert_eq!(session.state(), SessionState::Running);

        let reads_before = stream.reads();
        std::thread::sleep(Duration::from_millis(500));
        let reads = stream.reads() - reads_before;
        session.stop();

        // One 20 Hz timer reads ~10 times in 500ms; two would read ~20.
        assert!((6..=14).contains(&reads), "{reads} reads in 500ms");
    }

    #[test]
    fn test_stop_discards_in_flight_completion() {
        let (mut session, _) = session(30.0, Duration::from_millis(150));
        let batches = session.subscribe();

        session.start(source()).unwrap();
        wait_until("a frame in flight", || session.snapshot().is_processing);
        session.stop();

        let stats = session.stats();
        assert_eq!(stats.stale_discarded, 1);
        assert!(session.latest().is_none());
        assert!(batches.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Idle);

        let snapshot = session.snapshot();
        assert!(snapshot.detections.is_empty());
        assert!(!snapshot.is_processing);
    }

    #[test]
    fn test_closed_stream_is_invalid() {
        let (mut session, _) = session(15.0, Duration::ZERO);
        let stream = source();
        stream.close();

        let err = session.start(stream).unwrap_err();

        assert!(matches!(err, SessionError::InvalidStream));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_invalid_config_is_reported_before_start() {
        let mut session = DetectionSession::new(SessionConfig {
            target_fps: 0.0,
            ..Default::default()
        });

        let err = session.start(source()).unwrap_err();

        assert!(matches!(err, SessionError::Config(ConfigError::InvalidFps(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_snapshot_reflects_latest_batch() {
        let (mut session, _) = session(20.0, Duration::from_millis(5));

        session.start(source()).unwrap();
        wait_until("a batch", || session.latest().is_some());
        let snapshot = session.snapshot();
        session.stop();

        assert_eq!(snapshot.detections.len(), 1);
        assert_eq!(snapshot.provenance, Some(Provenance::Inferred));
        assert!(snapshot.frame_id.unwrap() >= 1);
    }

    #[test]
    fn test_mock_until_first_result_is_replaced() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let factory: EngineFactory = Arc::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(3));
            Ok(Box::new(StubEngine {
                delay: Duration::ZERO,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }) as Box<dyn InferenceEngine>)
        });
        let mut session = DetectionSession::new(SessionConfig {
            mock_detections: MockDetections::UntilFirstResult,
            ..config(20.0)
        })
        .with_engine_factory(factory);

        session.start(source()).unwrap();
        let placeholder = session.snapshot();
        assert_eq!(placeholder.provenance, Some(Provenance::Mock));
        assert_eq!(placeholder.frame_id, Some(0));
        assert_eq!(placeholder.detections.len(), 3);

        release_tx.send(()).unwrap();
        wait_until("a real batch", || {
            session.snapshot().provenance == Some(Provenance::Inferred)
        });
        session.stop();
        assert!(session.stats().completed > 0);
    }

    #[test]
    fn test_mock_always_skips_inference() {
        let mut session = DetectionSession::new(SessionConfig {
            mock_detections: MockDetections::Always,
            ..config(20.0)
        });

        session.start(source()).unwrap();
        wait_until("a mock batch", || session.latest().is_some());
        let batch = session.latest().unwrap();
        session.stop();

        assert_eq!(batch.provenance(), Provenance::Mock);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_missing_model_halts_dispatch_without_error() {
        let mut session = DetectionSession::new(SessionConfig {
            model_path: Some("/nonexistent/model.onnx".into()),
            ..config(30.0)
        });

        session.start(source()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(session.state(), SessionState::Running);
        session.stop();

        let stats = session.stats();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_remote_failure_delivers_fallback_batches() {
        let mut session = DetectionSession::new(SessionConfig {
            mode: BackendMode::Remote,
            endpoint_url: "http://127.0.0.1:9/api/detect".to_string(),
            remote_timeout_ms: 200,
            ..config(20.0)
        });

        session.start(source()).unwrap();
        wait_until("a fallback batch", || session.stats().fallbacks > 0);
        let batch = session.latest().unwrap();
        session.stop();

        assert_eq!(batch.provenance(), Provenance::Fallback);
        assert!(!batch.is_empty());
        assert!(batch.detections().iter().all(|d| d.is_well_formed()));
    }

    #[test]
    fn test_restart_after_stop_resets_stats() {
        // 2 Hz so the restarted loop cannot sample before the assertion.
        let (mut session, _) = session(2.0, Duration::ZERO);
        let stream = source();

        session.start(stream.clone()).unwrap();
        wait_until("a batch", || session.stats().completed > 0);
        session.stop();
        session.start(stream).unwrap();

        assert_eq!(session.stats(), SessionStats::default());
        session.stop();
    }

    #[test]
    fn test_stop_leaves_stream_open() {
        let (mut session, _) = session(20.0, Duration::ZERO);
        let stream = source();

        session.start(stream.clone()).unwrap();
        wait_until("a batch", || session.stats().completed > 0);
        session.stop();

        assert!(stream.is_live());
        assert!(stream.current_frame().is_some());

        session.start(stream.clone()).unwrap();
        wait_until("a batch after restart", || session.stats().completed > 0);
        session.stop();
        assert!(stream.is_live());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut session, _) = session(15.0, Duration::ZERO);
        let generation = session.generation();
        session.stop();
        assert_eq!(session.generation(), generation);
    }
}
