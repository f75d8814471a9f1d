use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::domain::video_source::VideoSource;
use crate::shared::frame::RawImage;

const FALLBACK_FPS: f64 = 30.0;

/// Plays a video file in real time on a background thread and exposes the
/// most recently decoded frame, the way a `<video>` element would.
///
/// Decoding is paced by the stream's frame rate so the sampler sees a live
/// stream rather than a firehose. With `looping`, playback restarts at the
/// end; otherwise the source stops being live after the last frame.
pub struct FfmpegVideoSource {
    shared: Arc<Shared>,
    decoder: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    latest: Mutex<Option<Arc<RawImage>>>,
    live: AtomicBool,
    closed: AtomicBool,
}

impl FfmpegVideoSource {
    /// Opens `path` and starts playback. Returns once the container and
    /// decoder are set up, or with the setup error.
    pub fn open(path: &Path, looping: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            live: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let thread_shared = shared.clone();
        let path: PathBuf = path.to_path_buf();
        let handle = std::thread::spawn(move || {
            play(&path, looping, &thread_shared, ready_tx);
            thread_shared.live.store(false, Ordering::Relaxed);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                decoder: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = handle.join();
                Err("decoder thread exited during setup".into())
            }
        }
    }

    /// Stops playback and joins the decoder thread.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        let handle = self
            .decoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Video decoder thread panicked");
            }
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl VideoSource for FfmpegVideoSource {
    fn current_frame(&self) -> Option<Arc<RawImage>> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Relaxed) && !self.shared.closed.load(Ordering::Relaxed)
    }
}

struct Playback {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    frame_interval: Duration,
}

fn setup(path: &Path) -> Result<Playback, Box<dyn std::error::Error>> {
    ffmpeg_next::init()?;

    let ictx = ffmpeg_next::format::input(path)?;
    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or("No video stream found")?;

    let stream_index = stream.index();
    let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    let decoder = codec_ctx.decoder().video()?;

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        FALLBACK_FPS
    };

    let scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg_next::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    Ok(Playback {
        ictx,
        decoder,
        scaler,
        stream_index,
        frame_interval: Duration::from_secs_f64(1.0 / fps),
    })
}

fn play(
    path: &Path,
    looping: bool,
    shared: &Shared,
    ready_tx: crossbeam_channel::Sender<Result<(), String>>,
) {
    let mut playback = match setup(path) {
        Ok(p) => p,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("{}: {e}", path.display())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    log::info!(
        "Playing {} at {:.1} fps{}",
        path.display(),
        1.0 / playback.frame_interval.as_secs_f64(),
        if looping { " (looping)" } else { "" }
    );

    loop {
        let Playback {
            ictx,
            decoder,
            scaler,
            stream_index,
            frame_interval,
        } = &mut playback;

        for (stream, packet) in ictx.packets() {
            if shared.closed.load(Ordering::Relaxed) {
                return;
            }
            if stream.index() != *stream_index || decoder.send_packet(&packet).is_err() {
                continue;
            }
            if !drain(decoder, scaler, *frame_interval, shared) {
                return;
            }
        }

        let _ = decoder.send_eof();
        if !drain(decoder, scaler, *frame_interval, shared) {
            return;
        }

        if !looping || ictx.seek(0, ..).is_err() {
            return;
        }
        decoder.flush();
    }
}

/// Publishes every frame the decoder has ready, pacing at the stream rate.
/// Returns `false` once the source has been closed.
fn drain(
    decoder: &mut ffmpeg_next::decoder::Video,
    scaler: &mut ffmpeg_next::software::scaling::Context,
    frame_interval: Duration,
    shared: &Shared,
) -> bool {
    let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        if shared.closed.load(Ordering::Relaxed) {
            return false;
        }
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = scaler.run(&decoded, &mut rgb_frame) {
            log::warn!("Skipping undecodable frame: {e}");
            continue;
        }
        let (width, height) = (rgb_frame.width(), rgb_frame.height());
        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        *shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(Arc::new(RawImage::new(pixels, width, height, 3)));
        std::thread::sleep(frame_interval);
    }
    true
}

fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_error() {
        let result = FfmpegVideoSource::open(Path::new("/nonexistent/clip.mp4"), false);
        assert!(result.is_err());
    }
}
