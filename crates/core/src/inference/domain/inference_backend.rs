use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::inference::domain::backend_state::{BackendState, BackendStateCell};
use crate::shared::detection::DetectionBatch;
use crate::shared::frame::Frame;

/// Why a frame was not accepted.
///
/// `NotReady` and `Busy` are routine drops under the backpressure policy;
/// `Stopped` means the caller kept submitting after teardown.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend is still initializing; frame dropped")]
    NotReady,
    #[error("backend is busy with another frame; frame dropped")]
    Busy,
    #[error("backend stopped")]
    Stopped,
}

impl BackendError {
    /// Maps the state that refused a `Ready → Busy` claim to an error.
    pub fn from_refusal(state: BackendState) -> Self {
        match state {
            BackendState::Uninitialized => BackendError::NotReady,
            BackendState::Ready | BackendState::Busy => BackendError::Busy,
            BackendState::Stopped => BackendError::Stopped,
        }
    }
}

/// Executes detection on frames, one at a time, off the caller's thread.
///
/// `submit` never blocks on inference: it either hands the frame to the
/// backend's worker or refuses it immediately. Results arrive later, in
/// completion order, through the [`CompletionSender`] the backend was
/// built with.
pub trait InferenceBackend: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> BackendState;

    /// Shared view of the state, for observers such as the session's
    /// `is_processing` flag.
    fn state_handle(&self) -> Arc<BackendStateCell>;

    fn submit(&mut self, frame: Frame) -> Result<(), BackendError>;

    /// Stops accepting frames and releases the execution context. Blocks
    /// until the backend's worker has exited. Idempotent.
    fn stop(&mut self);
}

/// A finished batch tagged with the session generation it belongs to.
#[derive(Debug)]
pub struct Completion {
    pub generation: u64,
    pub batch: DetectionBatch,
}

/// Result channel handed to a backend at construction.
///
/// Every delivery carries the generation fixed at creation, so the
/// receiving side can discard results from a session that has since been
/// stopped or restarted.
#[derive(Clone, Debug)]
pub struct CompletionSender {
    tx: Sender<Completion>,
    generation: u64,
}

impl CompletionSender {
    pub fn new(tx: Sender<Completion>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Returns `false` if nobody is listening anymore.
    pub fn deliver(&self, batch: DetectionBatch) -> bool {
        self.tx
            .send(Completion {
                generation: self.generation,
                batch,
            })
            .is_ok()
    }
}
