use ndarray::{ArrayView3, Axis};

/// A single decoded frame: contiguous RGB bytes in row-major order.
///
/// Frames are ephemeral. They live only until the face crop (if any) has
/// been taken from them.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Position of this frame in decode order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Rotates clockwise by `degrees` (0, 90, 180 or 270).
    ///
    /// Any other angle returns the frame unchanged, without copying.
    pub fn rotated(self, degrees: i32) -> Frame {
        let degrees = degrees.rem_euclid(360);
        if !matches!(degrees, 90 | 180 | 270) {
            return self;
        }
        let src = self.as_ndarray();
        let (view, width, height) = match degrees {
            90 => {
                let mut v = src.permuted_axes([1, 0, 2]);
                v.invert_axis(Axis(1));
                (v, self.height, self.width)
            }
            180 => {
                let mut v = src;
                v.invert_axis(Axis(0));
                v.invert_axis(Axis(1));
                (v, self.width, self.height)
            }
            _ => {
                let mut v = src.permuted_axes([1, 0, 2]);
                v.invert_axis(Axis(0));
                (v, self.height, self.width)
            }
        };
        let data: Vec<u8> = view.iter().copied().collect();
        Frame::new(data, width, height, self.channels, self.index)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
