use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::capture::domain::video_source::{SharedVideoSource, VideoSource};
use crate::sampling::drawing_surface::DrawingSurface;
use crate::shared::clock::now_ms;
use crate::shared::frame::Frame;

/// Turns a live video source into downsampled, numbered frames at a fixed
/// rate.
///
/// Frame ids start at 1 and increase by one for every frame produced;
/// ticks on which the source has nothing readable are skipped without
/// consuming an id.
pub struct FrameSampler {
    surface: DrawingSurface,
    interval: Duration,
    next_frame_id: u64,
}

impl FrameSampler {
    /// `target_fps` must be positive; callers validate configuration first.
    pub fn new(target_fps: f64, width: u32, height: u32) -> Self {
        Self {
            surface: DrawingSurface::new(width, height),
            interval: Duration::from_secs_f64(1.0 / target_fps),
            next_frame_id: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reads the source's current frame and draws it onto the surface.
    pub fn sample(&mut self, source: &dyn VideoSource) -> Option<Frame> {
        let image = source.current_frame()?;
        let capture_ts = now_ms();
        if !self.surface.draw(&image) {
            log::trace!(
                "Skipping unreadable {}x{}x{} source frame",
                image.width(),
                image.height(),
                image.channels()
            );
            return None;
        }

        let frame = Frame::new(
            self.surface.pixels().to_vec(),
            self.surface.width(),
            self.surface.height(),
            self.next_frame_id,
            capture_ts,
        );
        self.next_frame_id += 1;
        Some(frame)
    }

    /// Consumes the sampler into a blocking frame sequence driven by a timer.
    ///
    /// The sequence ends once `stop` receives a message or its sender is
    /// dropped, and cannot be restarted.
    pub fn frames(self, source: SharedVideoSource, stop: Receiver<()>) -> SampledFrames {
        let ticker = crossbeam_channel::tick(self.interval);
        SampledFrames {
            sampler: self,
            source,
            ticker,
            stop,
            stopped: false,
        }
    }
}

/// Timer-driven frame sequence produced by [`FrameSampler::frames`].
pub struct SampledFrames {
    sampler: FrameSampler,
    source: SharedVideoSource,
    ticker: Receiver<std::time::Instant>,
    stop: Receiver<()>,
    stopped: bool,
}

impl SampledFrames {
    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }
}

impl Iterator for SampledFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while !self.stopped {
            if self.stop_requested() {
                self.stopped = true;
                break;
            }
            crossbeam_channel::select! {
                recv(self.stop) -> _ => self.stopped = true,
                recv(self.ticker) -> _ => {
                    if let Some(frame) = self.sampler.sample(&*self.source) {
                        return Some(frame);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::capture::infrastructure::synthetic_source::SyntheticVideoSource;

    #[test]
    fn test_sample_downsamples_to_target() {
        let source = SyntheticVideoSource::new(640, 480);
        let mut sampler = FrameSampler::new(15.0, 320, 240);

        let frame = sampler.sample(&source).unwrap();

        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
        assert_eq!(frame.data().len(), 320 * 240 * 3);
    }

    #[test]
    fn test_frame_ids_increase_monotonically() {
        let source = SyntheticVideoSource::new(64, 48);
        let mut sampler = FrameSampler::new(15.0, 32, 24);

        let ids: Vec<u64> = (0..4)
            .filter_map(|_| sampler.sample(&source))
            .map(|f| f.frame_id())
            .collect();

        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unreadable_tick_is_skipped_without_consuming_id() {
        let source = SyntheticVideoSource::new(64, 48).with_warmup(2);
        let mut sampler = FrameSampler::new(15.0, 32, 24);

        assert!(sampler.sample(&source).is_none());
        assert!(sampler.sample(&source).is_none());
        assert_eq!(sampler.sample(&source).unwrap().frame_id(), 1);
    }

    #[test]
    fn test_capture_timestamps_do_not_decrease() {
        let source = SyntheticVideoSource::new(16, 16);
        let mut sampler = FrameSampler::new(15.0, 8, 8);

        let a = sampler.sample(&source).unwrap();
        let b = sampler.sample(&source).unwrap();

        assert!(b.capture_ts() >= a.capture_ts());
    }

    #[test]
    fn test_interval_matches_rate() {
        let sampler = FrameSampler::new(20.0, 8, 8);
        assert_eq!(sampler.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_frames_follow_the_timer() {
        let source: SharedVideoSource = Arc::new(SyntheticVideoSource::new(32, 24));
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let started = Instant::now();

        let frames: Vec<Frame> = FrameSampler::new(50.0, 16, 12)
            .frames(source, stop_rx)
            .take(5)
            .collect();

        assert_eq!(frames.len(), 5);
        // Five ticks at 20ms cannot complete in under ~100ms.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_frames_end_when_stop_sender_dropped() {
        let source: SharedVideoSource = Arc::new(SyntheticVideoSource::new(32, 24));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut frames = FrameSampler::new(100.0, 16, 12).frames(source, stop_rx);

        assert!(frames.next().is_some());
        drop(stop_tx);
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_frames_end_on_stop_message() {
        let source: SharedVideoSource = Arc::new(SyntheticVideoSource::new(32, 24));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut frames = FrameSampler::new(100.0, 16, 12).frames(source, stop_rx);

        stop_tx.send(()).unwrap();
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_closed_stream_yields_no_frames() {
        let synthetic = Arc::new(SyntheticVideoSource::new(32, 24));
        synthetic.close();
        let source: SharedVideoSource = synthetic.clone();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::spawn(move || {
            FrameSampler::new(100.0, 16, 12)
                .frames(source, stop_rx)
                .count()
        });
        std::thread::sleep(Duration::from_millis(60));
        drop(stop_tx);

        assert_eq!(handle.join().unwrap(), 0);
        assert!(synthetic.reads() > 0);
    }
}
