use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count reported by the container; 0 when unknown.
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
    /// Clockwise display rotation in degrees: 0, 90, 180 or 270.
    pub rotation: i32,
}

impl VideoMetadata {
    /// Approximate duration in seconds, if the container reports enough to tell.
    pub fn duration_secs(&self) -> Option<f64> {
        (self.fps > 0.0 && self.total_frames > 0).then(|| self.total_frames as f64 / self.fps)
    }
}
