use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::inference::domain::backend_state::{BackendState, BackendStateCell};
use crate::inference::domain::inference_backend::{BackendError, CompletionSender};
use crate::shared::detection::DetectionBatch;
use crate::shared::frame::Frame;

pub(crate) type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Per-frame work run on a backend's dedicated thread.
pub(crate) trait FrameJob: Send + 'static {
    /// Runs once on the worker thread before any frame is accepted.
    fn init(&mut self) -> Result<(), InitError>;

    /// `None` means the frame produced no batch; the failure is logged by
    /// the job.
    fn process(&mut self, frame: Frame) -> Option<DetectionBatch>;
}

/// Thread plus submit channel behind every backend variant.
///
/// The submit channel holds a single frame and is only written after the
/// state cell grants the `Ready → Busy` claim, so at most one frame is ever
/// in flight and a second submission is refused instead of queued.
pub(crate) struct BackendWorker {
    name: &'static str,
    state: Arc<BackendStateCell>,
    submit_tx: Option<Sender<Frame>>,
    handle: Option<JoinHandle<()>>,
}

impl BackendWorker {
    pub(crate) fn spawn<J: FrameJob>(
        name: &'static str,
        job: J,
        completions: CompletionSender,
    ) -> Self {
        let state = Arc::new(BackendStateCell::new());
        let (submit_tx, submit_rx) = crossbeam_channel::bounded::<Frame>(1);
        let handle = spawn_worker(name, job, submit_rx, state.clone(), completions);
        Self {
            name,
            state,
            submit_tx: Some(submit_tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn state(&self) -> BackendState {
        self.state.load()
    }

    pub(crate) fn state_handle(&self) -> Arc<BackendStateCell> {
        self.state.clone()
    }

    pub(crate) fn submit(&mut self, frame: Frame) -> Result<(), BackendError> {
        self.state
            .try_begin()
            .map_err(BackendError::from_refusal)?;

        let Some(tx) = &self.submit_tx else {
            self.state.stop();
            return Err(BackendError::Stopped);
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.state.finish();
                Err(BackendError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.state.stop();
                Err(BackendError::Stopped)
            }
        }
    }

    /// Marks the backend stopped, closes the submit channel and joins the
    /// worker. Blocks for at most the frame currently in flight.
    pub(crate) fn stop(&mut self) {
        self.state.stop();
        self.submit_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} backend worker panicked", self.name);
            }
            log::debug!("{} backend stopped", self.name);
        }
    }
}

impl Drop for BackendWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker<J: FrameJob>(
    name: &'static str,
    mut job: J,
    submit_rx: Receiver<Frame>,
    state: Arc<BackendStateCell>,
    completions: CompletionSender,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = job.init() {
            log::error!("{name} backend failed to initialize: {e}");
            state.stop();
            return;
        }
        if !state.mark_ready() {
            return;
        }
        log::info!("{name} backend ready");

        for frame in submit_rx {
            if state.load() == BackendState::Stopped {
                break;
            }
            let frame_id = frame.frame_id();
            if let Some(batch) = job.process(frame) {
                if !completions.deliver(batch) {
                    log::debug!("{name} backend: no listener for frame {frame_id}");
                    state.stop();
                    break;
                }
            }
            state.finish();
        }
    })
}
