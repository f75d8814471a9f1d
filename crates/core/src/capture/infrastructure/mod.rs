#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source;
pub mod synthetic_source;
