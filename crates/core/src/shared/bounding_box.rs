/// An axis-aligned face box in integer pixel coordinates.
///
/// `(x1, y1)` is inclusive, `(x2, y2)` exclusive, matching slice semantics
/// when cropping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub score: f32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, score: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    /// Builds a box from detector output, truncating coordinates toward zero.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> Self {
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32, score as f32)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Clamps the box to a `width` x `height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let w = width.min(i32::MAX as u32) as i32;
        let h = height.min(i32::MAX as u32) as i32;
        let clamped = BoundingBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
            score: self.score,
        };
        (clamped.x2 > clamped.x1 && clamped.y2 > clamped.y1).then_some(clamped)
    }
}
