use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::infrastructure::backend_factory::BackendMode;
use crate::inference::infrastructure::remote_backend::{FallbackStrategy, RemoteConfig};
use crate::shared::constants::{
    DEFAULT_CONFIDENCE, DEFAULT_ENDPOINT_URL, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH,
    DEFAULT_JPEG_QUALITY, DEFAULT_REMOTE_TIMEOUT_MS, DEFAULT_TARGET_FPS, MAX_FRAME_DIMENSION,
    MAX_TARGET_FPS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("target_fps must be in (0, 120], got {0}")]
    InvalidFps(f64),
    #[error("frame size must be within 1..=4096 per side, got {width}x{height}")]
    InvalidFrameSize { width: u32, height: u32 },
    #[error("endpoint_url {url:?} is not a valid http(s) URL")]
    InvalidEndpoint { url: String },
    #[error("remote_timeout_ms must be positive")]
    ZeroTimeout,
    #[error("jpeg_quality must be in 1..=100, got {0}")]
    InvalidJpegQuality(u8),
    #[error("confidence must be in [0, 1], got {0}")]
    InvalidConfidence(f64),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Debug strategy for showing boxes without a working model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockDetections {
    #[default]
    Off,
    /// Publish placeholder detections at start, until the first real batch
    /// replaces them.
    UntilFirstResult,
    /// Skip inference entirely and report placeholders for every frame.
    Always,
}

impl std::str::FromStr for MockDetections {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "until_first_result" => Ok(Self::UntilFirstResult),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown mock detection strategy: {other}")),
        }
    }
}

/// How the result sink treats batches that complete out of frame order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrder {
    /// Whatever completed last is published.
    #[default]
    LatestWins,
    /// Batches for frames older than the newest published one are dropped.
    DropOutOfOrder,
}

impl std::str::FromStr for DeliveryOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest_wins" => Ok(Self::LatestWins),
            "drop_out_of_order" => Ok(Self::DropOutOfOrder),
            other => Err(format!("unknown delivery order: {other}")),
        }
    }
}

/// Everything a [`DetectionSession`](super::detection_session::DetectionSession)
/// needs to pick and drive its backend. Missing JSON fields take their
/// defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: BackendMode,
    pub target_fps: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub endpoint_url: String,
    pub remote_timeout_ms: u64,
    pub jpeg_quality: u8,
    pub model_path: Option<PathBuf>,
    pub confidence: f64,
    pub fallback: FallbackStrategy,
    pub mock_detections: MockDetections,
    pub ordering: DeliveryOrder,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Local,
            target_fps: DEFAULT_TARGET_FPS,
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            model_path: None,
            confidence: DEFAULT_CONFIDENCE,
            fallback: FallbackStrategy::Placeholder,
            mock_detections: MockDetections::Off,
            ordering: DeliveryOrder::LatestWins,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps > 0.0 && self.target_fps <= MAX_TARGET_FPS) {
            return Err(ConfigError::InvalidFps(self.target_fps));
        }
        let side = 1..=MAX_FRAME_DIMENSION;
        if !side.contains(&self.frame_width) || !side.contains(&self.frame_height) {
            return Err(ConfigError::InvalidFrameSize {
                width: self.frame_width,
                height: self.frame_height,
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::InvalidJpegQuality(self.jpeg_quality));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::InvalidConfidence(self.confidence));
        }
        if self.mode == BackendMode::Remote {
            let valid = reqwest::Url::parse(&self.endpoint_url)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidEndpoint {
                    url: self.endpoint_url.clone(),
                });
            }
            if self.remote_timeout_ms == 0 {
                return Err(ConfigError::ZeroTimeout);
            }
        }
        Ok(())
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            endpoint_url: self.endpoint_url.clone(),
            timeout: std::time::Duration::from_millis(self.remote_timeout_ms),
            jpeg_quality: self.jpeg_quality,
            fallback: self.fallback,
        }
    }

    /// Platform config file, e.g. `~/.config/live-detect/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("live-detect").join("config.json"))
    }

    /// Reads a JSON config. Not validated; call [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The config at [`default_path`](Self::default_path), or defaults if it
    /// is absent or unreadable.
    pub fn load_or_default() -> Self {
        Self::default_path()
            .filter(|path| path.is_file())
            .and_then(|path| match Self::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    log::warn!("Ignoring config: {e}");
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }
}
