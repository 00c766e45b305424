pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Convolutional feature extractor inside a classifier model directory.
pub const BACKBONE_MODEL_NAME: &str = "backbone.onnx";
/// LSTM + linear head weights inside a classifier model directory.
pub const TEMPORAL_HEAD_WEIGHTS_NAME: &str = "temporal_head.safetensors";

/// Square side length faces are resized to before the backbone.
///
/// Fixed at build time: the backbone weights were trained at this resolution
/// and a different value silently degrades the classifier.
pub const FACE_INPUT_SIZE: u32 = 112;

/// Maximum number of faces sampled from one video.
pub const MAX_FRAMES: usize = 32;

/// Per-frame failures tolerated before extraction stops early.
pub const MAX_FRAME_ERRORS: usize = 5;

/// Embedding magnitude above which the temporal stage input is reported.
pub const EMBEDDING_MAGNITUDE_LIMIT: f32 = 1e6;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];
