pub const DEFAULT_TARGET_FPS: f64 = 15.0;
pub const MAX_TARGET_FPS: f64 = 120.0;

/// Downsample target; bounds payload size and inference cost.
pub const DEFAULT_FRAME_WIDTH: u32 = 320;
pub const DEFAULT_FRAME_HEIGHT: u32 = 240;
pub const MAX_FRAME_DIMENSION: u32 = 4096;

pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:8000/api/detect";
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub const DEFAULT_MODEL_NAME: &str = "yolov8n.onnx";

/// Models shipped next to the binary, relative to the working directory.
pub const BUNDLED_MODEL_DIR: &str = "models";

/// Score threshold applied by the local ONNX engine.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

