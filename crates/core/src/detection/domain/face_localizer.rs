use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Domain interface for locating faces in a frame.
///
/// Boxes are returned in priority order: callers that keep a single face
/// per frame take the first valid one. An empty vector means no face, not
/// an error.
pub trait FaceLocalizer: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>>;
}
