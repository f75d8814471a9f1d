use std::sync::Arc;

use crate::shared::frame::RawImage;

/// A live video stream the pipeline can read pixels from.
///
/// The pipeline only ever reads the current frame. Opening, pausing and
/// closing the stream belong to whoever created it.
pub trait VideoSource: Send + Sync {
    /// The most recent decoded frame, or `None` if nothing is readable yet
    /// (e.g. the stream is still loading).
    fn current_frame(&self) -> Option<Arc<RawImage>>;

    /// Whether the stream is still delivering frames. A session refuses to
    /// start on a stream that is not live.
    fn is_live(&self) -> bool;
}

/// Borrowed handle to a caller-owned stream.
pub type SharedVideoSource = Arc<dyn VideoSource>;
