use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds of the video-to-verdict pipeline.
///
/// Every stage returns one of these; only the outermost boundary turns
/// them into user-facing strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error("could not open video {path}: {reason}")]
    VideoUnreadable { path: PathBuf, reason: String },
    #[error("video is corrupt or contains no decodable frames: {0}")]
    VideoCorruptOrEmpty(String),
    #[error("No faces detected in the video")]
    NoFaceDetected,
    #[error("face extraction timed out after {0:?} without finding a face")]
    ExtractionTimedOut(std::time::Duration),
    #[error("face detector failed to initialize: {0}")]
    DetectorInitFailed(String),
    #[error("failed to load classifier model: {0}")]
    ModelLoadFailed(String),
    #[error("face preprocessing failed: {0}")]
    PreprocessFailed(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

impl PredictionError {
    /// True when the input itself is at fault (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::VideoUnreadable { .. } | Self::VideoCorruptOrEmpty(_) | Self::NoFaceDetected
        )
    }

    /// HTTP-equivalent status for callers that expose the pipeline over a
    /// request/response boundary.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}
