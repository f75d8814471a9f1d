use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::pipeline::session_config::DeliveryOrder;
use crate::shared::detection::DetectionBatch;

/// Batches a subscriber may leave unread before newer ones are dropped for it.
pub const SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The batch belongs to a generation that has since been stopped.
    Stale,
    /// Dropped under [`DeliveryOrder::DropOutOfOrder`].
    OutOfOrder,
}

/// Holds the most recent detection batch and fans completed batches out to
/// subscribers.
///
/// Every publish carries the generation it was produced under and is
/// checked against the current one while the lock is held, so a session
/// stop (which advances the generation) and a late publish can never
/// interleave.
pub struct ResultSink {
    inner: Mutex<SinkState>,
}

struct SinkState {
    generation: u64,
    ordering: DeliveryOrder,
    latest: Option<Arc<DetectionBatch>>,
    newest_frame_id: u64,
    subscribers: Vec<Sender<Arc<DetectionBatch>>>,
}

impl ResultSink {
    pub fn new(ordering: DeliveryOrder) -> Self {
        Self {
            inner: Mutex::new(SinkState {
                generation: 0,
                ordering,
                latest: None,
                newest_frame_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Invalidates everything published or in flight under the current
    /// generation and clears the retained batch. Returns the new generation.
    pub fn advance_generation(&self) -> u64 {
        let mut state = self.state();
        state.generation += 1;
        state.latest = None;
        state.newest_frame_id = 0;
        state.generation
    }

    pub fn publish(&self, generation: u64, batch: DetectionBatch) -> PublishOutcome {
        let mut state = self.state();
        if generation != state.generation {
            return PublishOutcome::Stale;
        }
        if state.ordering == DeliveryOrder::DropOutOfOrder
            && batch.frame_id() < state.newest_frame_id
        {
            log::debug!(
                "Dropping batch for frame {} behind frame {}",
                batch.frame_id(),
                state.newest_frame_id
            );
            return PublishOutcome::OutOfOrder;
        }

        state.newest_frame_id = state.newest_frame_id.max(batch.frame_id());
        let batch = Arc::new(batch);
        state.subscribers.retain(|tx| match tx.try_send(batch.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        state.latest = Some(batch);
        PublishOutcome::Published
    }

    pub fn latest(&self) -> Option<Arc<DetectionBatch>> {
        self.state().latest.clone()
    }

    /// Receives every batch published from now on. Dropping the receiver
    /// unsubscribes.
    ///
    /// The channel holds at most [`SUBSCRIBER_CAPACITY`] batches. While it
    /// is full, new batches are skipped for that subscriber only; it keeps
    /// its subscription and receives again once it drains.
    pub fn subscribe(&self) -> Receiver<Arc<DetectionBatch>> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        self.state().subscribers.push(tx);
        rx
    }
}
