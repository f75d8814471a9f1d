use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of an inference backend.
///
/// `Uninitialized → Ready ⇄ Busy`, and any state → `Stopped`, which is
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendState {
    Uninitialized = 0,
    Ready = 1,
    Busy = 2,
    Stopped = 3,
}

impl BackendState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BackendState::Uninitialized,
            1 => BackendState::Ready,
            2 => BackendState::Busy,
            _ => BackendState::Stopped,
        }
    }
}

/// Atomic cell holding a [`BackendState`], shared between the submitting
/// side and the backend's worker thread.
///
/// Every transition is a compare-and-swap, so a worker finishing a frame
/// can never resurrect a backend that was stopped meanwhile.
#[derive(Debug)]
pub struct BackendStateCell(AtomicU8);

impl BackendStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(BackendState::Uninitialized as u8))
    }

    pub fn load(&self) -> BackendState {
        BackendState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Uninitialized → Ready`. Returns `false` if initialization lost the
    /// race against `stop`.
    pub fn mark_ready(&self) -> bool {
        self.transition(BackendState::Uninitialized, BackendState::Ready)
            .is_ok()
    }

    /// `Ready → Busy`: claims the single in-flight slot. On failure returns
    /// the state that prevented it.
    pub fn try_begin(&self) -> Result<(), BackendState> {
        self.transition(BackendState::Ready, BackendState::Busy)
    }

    /// `Busy → Ready`: releases the in-flight slot. No-op once stopped.
    pub fn finish(&self) {
        let _ = self.transition(BackendState::Busy, BackendState::Ready);
    }

    /// Moves to `Stopped` from any state and returns the previous state.
    pub fn stop(&self) -> BackendState {
        BackendState::from_u8(self.0.swap(BackendState::Stopped as u8, Ordering::AcqRel))
    }

    fn transition(&self, from: BackendState, to: BackendState) -> Result<(), BackendState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(BackendState::from_u8)
    }
}

impl Default for BackendStateCell {
    fn default() -> Self {
        Self::new()
    }
}
