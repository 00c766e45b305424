use std::path::Path;
use std::time::Instant;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Item yielded by [`VideoReader::frames`].
pub type FrameResult = Result<Frame, Box<dyn std::error::Error>>;

/// Decodes frames from a video source.
///
/// Implementations own the decoder state. The pipeline only sees
/// [`Frame`]s and [`VideoMetadata`].
pub trait VideoReader: Send {
    /// Bounds how long `open` and frame reads may block.
    ///
    /// Once `deadline` passes, a blocked call gives up with an error
    /// instead of waiting on the source. `None` removes the bound.
    fn set_deadline(&mut self, deadline: Option<Instant>);

    /// Opens a video file and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    /// Returns an iterator over frames in decode order.
    ///
    /// A frame that fails to decode is yielded as `Err`; iteration may
    /// continue past it.
    fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_>;

    /// Releases decoder resources. Must be safe to call more than once.
    fn close(&mut self);
}
