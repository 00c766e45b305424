//! YOLO face localizer running on ONNX Runtime.
//!
//! Frames are letterboxed to the model's square input, raw candidates are
//! filtered by confidence and reduced with greedy NMS. The surviving boxes
//! come back most confident first, which is the order the extractor's
//! "first valid box" rule relies on.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array4, ArrayViewD, Axis};

use crate::detection::domain::face_localizer::FaceLocalizer;
use crate::execution::domain::device::Device;
use crate::execution::infrastructure::execution_provider::providers_for;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;
use crate::shared::prediction_error::PredictionError;

/// Square input side used when the model declares a dynamic input.
const FALLBACK_INPUT_SIZE: u32 = 640;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const NMS_IOU_THRESHOLD: f64 = 0.45;

/// Letterbox padding value (114 gray), as the YOLO exporters train with.
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct OnnxYoloLocalizer {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloLocalizer {
    /// Load the face model at `model_path` on `device`.
    ///
    /// Any failure here is `DetectorInitFailed`.
    pub fn new(
        model_path: &Path,
        confidence: f64,
        device: Device,
    ) -> Result<Self, PredictionError> {
        let session = build_session(model_path, device).map_err(|e| {
            PredictionError::DetectorInitFailed(format!("{}: {e}", model_path.display()))
        })?;

        let input_size = static_input_size(&session).unwrap_or(FALLBACK_INPUT_SIZE);
        log::info!(
            "Face localizer ready: {} (input {input_size}px, confidence {confidence}, {device})",
            model_path.display()
        );

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

fn build_session(
    model_path: &Path,
    device: Device,
) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    Ok(ort::session::Session::builder()?
        .with_execution_providers(providers_for(device))?
        .commit_from_file(model_path)?)
}

/// Height of an `[N, C, H, W]` input, when the export fixes it.
fn static_input_size(session: &ort::session::Session) -> Option<u32> {
    let input = session.inputs().first()?;
    let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() else {
        return None;
    };
    match shape.len() {
        4 if shape[2] > 0 => u32::try_from(shape[2]).ok(),
        _ => None,
    }
}

impl FaceLocalizer for OnnxYoloLocalizer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>> {
        let (input, letterbox) = Letterbox::apply(frame, self.input_size)?;

        let outputs = self
            .session
            .run(ort::inputs![ort::value::Tensor::from_array(input)?])?;
        if outputs.len() == 0 {
            return Err("face model produced no outputs".into());
        }
        let predictions = outputs[0].try_extract_array::<f32>()?;

        let candidates = decode_predictions(predictions, self.confidence, &letterbox)?;
        Ok(suppress_overlaps(candidates, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|c| BoundingBox::from_corners(c.x1, c.y1, c.x2, c.y2, c.score))
            .collect())
    }
}

/// Placement of a frame inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    fitted_w: u32,
    fitted_h: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f64 / width as f64).min(side as f64 / height as f64);
        let fitted_w = ((width as f64 * scale).round() as u32).clamp(1, side);
        let fitted_h = ((height as f64 * scale).round() as u32).clamp(1, side);
        Self {
            scale,
            fitted_w,
            fitted_h,
            pad_x: (side - fitted_w) / 2,
            pad_y: (side - fitted_h) / 2,
        }
    }

    /// Resize `frame` into a padded `[1, 3, side, side]` tensor in `[0, 1]`.
    fn apply(
        frame: &Frame,
        side: u32,
    ) -> Result<(Array4<f32>, Self), Box<dyn std::error::Error>> {
        if frame.width() == 0 || frame.height() == 0 || frame.channels() != 3 {
            return Err(format!(
                "cannot locate faces in a {}x{}x{} frame",
                frame.width(),
                frame.height(),
                frame.channels()
            )
            .into());
        }
        let letterbox = Self::fit(frame.width(), frame.height(), side);
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("frame buffer does not match its dimensions")?;
        let fitted = image::imageops::resize(
            &image,
            letterbox.fitted_w,
            letterbox.fitted_h,
            FilterType::Triangle,
        );

        let side = side as usize;
        let mut tensor = Array4::from_elem((1, 3, side, side), PAD_VALUE);
        let (top, left) = (letterbox.pad_y as usize, letterbox.pad_x as usize);
        for (x, y, pixel) in fitted.enumerate_pixels() {
            for (c, &v) in pixel.0.iter().enumerate() {
                tensor[[0, c, top + y as usize, left + x as usize]] = v as f32 / 255.0;
            }
        }
        Ok((tensor, letterbox))
    }

    /// Map a model-space point back to frame coordinates.
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    score: f64,
}

impl Candidate {
    fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f64 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// Read `[1, features, anchors]` or `[1, anchors, features]` predictions.
///
/// Features start with `cx, cy, w, h, score`; anything after (pose
/// keypoints) is ignored. Candidates below `min_score` are dropped.
fn decode_predictions(
    predictions: ArrayViewD<'_, f32>,
    min_score: f64,
    letterbox: &Letterbox,
) -> Result<Vec<Candidate>, String> {
    let shape = predictions.shape().to_vec();
    let predictions = predictions
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|_| format!("unexpected face model output shape {shape:?}"))?;
    let rows = predictions.index_axis_move(Axis(0), 0);
    // Exports differ in layout; anchors always outnumber features.
    let rows = if rows.nrows() < rows.ncols() {
        rows.reversed_axes()
    } else {
        rows
    };
    if rows.ncols() < 5 {
        return Ok(Vec::new());
    }

    Ok(rows
        .outer_iter()
        .filter(|row| row[4] as f64 >= min_score)
        .map(|row| {
            let (cx, cy) = (row[0] as f64, row[1] as f64);
            let (half_w, half_h) = (row[2] as f64 / 2.0, row[3] as f64 / 2.0);
            let (x1, y1) = letterbox.unmap(cx - half_w, cy - half_h);
            let (x2, y2) = letterbox.unmap(cx + half_w, cy + half_h);
            Candidate {
                x1,
                y1,
                x2,
                y2,
                score: row[4] as f64,
            }
        })
        .collect())
}

/// Greedy NMS. Output is sorted by score, highest first.
fn suppress_overlaps(mut candidates: Vec<Candidate>, iou_threshold: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
