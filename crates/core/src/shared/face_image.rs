use image::RgbImage;
use ndarray::s;

use super::bounding_box::BoundingBox;
use super::frame::Frame;

/// A face cropped out of a single frame.
#[derive(Clone, Debug)]
pub struct FaceImage {
    image: RgbImage,
    frame_index: usize,
}

impl FaceImage {
    pub fn new(image: RgbImage, frame_index: usize) -> Self {
        Self { image, frame_index }
    }

    /// Crops `bbox` out of `frame`.
    ///
    /// The box is clamped to the frame first. Returns `None` if nothing
    /// remains after clamping or the frame is not 3-channel.
    pub fn crop(frame: &Frame, bbox: &BoundingBox) -> Option<FaceImage> {
        if frame.channels() != 3 {
            return None;
        }
        let b = bbox.clamp(frame.width(), frame.height())?;
        let region = frame
            .as_ndarray()
            .slice(s![b.y1 as usize..b.y2 as usize, b.x1 as usize..b.x2 as usize, ..])
            .iter()
            .copied()
            .collect::<Vec<u8>>();
        let image = RgbImage::from_raw(b.width() as u32, b.height() as u32, region)?;
        Some(FaceImage::new(image, frame.index()))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decode index of the frame this face was taken from.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }
}

/// Faces sampled from one video, in frame arrival order.
///
/// Holds at most `capacity` faces and at most one face per source frame.
#[derive(Clone, Debug)]
pub struct FaceSequence {
    faces: Vec<FaceImage>,
    capacity: usize,
}

impl FaceSequence {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            faces: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a face. Rejects it when the sequence is full, or when it
    /// comes from a frame that is not strictly after the last one.
    pub fn push(&mut self, face: FaceImage) -> bool {
        if self.is_full() {
            return false;
        }
        if let Some(last) = self.faces.last() {
            if face.frame_index <= last.frame_index {
                return false;
            }
        }
        self.faces.push(face);
        true
    }

    pub fn is_full(&self) -> bool {
        self.faces.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FaceImage> {
        self.faces.iter()
    }
}
