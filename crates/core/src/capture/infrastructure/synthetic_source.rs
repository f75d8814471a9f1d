use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::capture::domain::video_source::VideoSource;
use crate::shared::frame::RawImage;

const BACKGROUND: u8 = 96;
const SWEEP_PERIOD_SECS: f64 = 2.0;

/// Generated RGB stream: a white square sweeping left to right over a gray
/// background, one full sweep every two seconds.
///
/// Stands in for a camera in tests and in the CLI. The first
/// `warmup_reads` reads return nothing, like a video element that has not
/// loaded yet.
pub struct SyntheticVideoSource {
    width: u32,
    height: u32,
    started: Instant,
    warmup_reads: AtomicUsize,
    reads: AtomicUsize,
    closed: AtomicBool,
}

impl SyntheticVideoSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
            warmup_reads: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_warmup(self, reads: usize) -> Self {
        self.warmup_reads.store(reads, Ordering::Relaxed);
        self
    }

    /// Ends the stream. Only the owner calls this; the pipeline never does.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Number of `current_frame` calls so far, readable or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn render(&self) -> RawImage {
        let w = self.width as usize;
        let h = self.height as usize;
        let side = (w.min(h) / 4).max(1);

        let phase = (self.started.elapsed().as_secs_f64() / SWEEP_PERIOD_SECS).fract();
        let left = ((w.saturating_sub(side)) as f64 * phase) as usize;
        let top = h.saturating_sub(side) / 2;

        let mut data = vec![BACKGROUND; w * h * 3];
        for y in top..(top + side).min(h) {
            let row = y * w * 3;
            data[row + left * 3..row + (left + side).min(w) * 3].fill(255);
        }
        RawImage::new(data, self.width, self.height, 3)
    }
}

impl VideoSource for SyntheticVideoSource {
    fn current_frame(&self) -> Option<Arc<RawImage>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !self.is_live() {
            return None;
        }
        let warming = self
            .warmup_reads
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if warming {
            return None;
        }
        Some(Arc::new(self.render()))
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && self.width > 0 && self.height > 0
    }
}
