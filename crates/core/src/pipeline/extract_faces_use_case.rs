use std::path::Path;
use std::time::{Duration, Instant};

use crate::detection::domain::face_localizer::FaceLocalizer;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::constants::{DEFAULT_EXTRACTION_TIMEOUT_SECS, MAX_FRAMES, MAX_FRAME_ERRORS};
use crate::shared::face_image::{FaceImage, FaceSequence};
use crate::shared::frame::Frame;
use crate::shared::prediction_error::PredictionError;
use crate::video::domain::frame_sampler::FrameSampler;
use crate::video::domain::video_reader::VideoReader;

#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    /// Faces to collect before stopping.
    pub max_frames: usize,
    /// Decode or detector failures tolerated before stopping early.
    pub max_frame_errors: usize,
    /// Wall-clock budget for the whole scan. The reader is interrupted
    /// once it runs out, and it is also checked after each frame.
    pub timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            max_frame_errors: MAX_FRAME_ERRORS,
            timeout: Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub frames_scanned: usize,
    pub frames_without_face: usize,
    pub frame_errors: usize,
    /// Stopped by the error threshold or the timeout rather than by
    /// reaching `max_frames` or the end of the stream.
    pub truncated: bool,
    pub timed_out: bool,
}

/// Samples one face per frame from a video, in temporal order.
pub struct ExtractFacesUseCase<'a> {
    localizer: &'a mut dyn FaceLocalizer,
    config: &'a ExtractionConfig,
}

impl<'a> ExtractFacesUseCase<'a> {
    pub fn new(localizer: &'a mut dyn FaceLocalizer, config: &'a ExtractionConfig) -> Self {
        Self { localizer, config }
    }

    /// Decode `path` with `reader` and collect up to `max_frames` faces.
    ///
    /// Frames without a face are skipped. When the error threshold or the
    /// timeout ends the scan early, whatever was collected is returned.
    pub fn execute(
        &mut self,
        reader: Box<dyn VideoReader>,
        path: &Path,
        logger: &mut dyn PipelineLogger,
    ) -> Result<(FaceSequence, ExtractionStats), PredictionError> {
        let started = Instant::now();
        let mut sampler = FrameSampler::open(reader, path, Some(self.config.timeout))?;
        let mut faces = FaceSequence::with_capacity(self.config.max_frames);
        let mut stats = ExtractionStats::default();

        for item in sampler.frames()? {
            stats.frames_scanned += 1;
            match item {
                Ok(frame) => match self.first_face(&frame, logger) {
                    Ok(Some(face)) => {
                        if faces.push(face) {
                            logger.progress(faces.len(), self.config.max_frames);
                        } else {
                            log::debug!("Dropped out-of-order face from frame {}", frame.index());
                        }
                    }
                    Ok(None) => stats.frames_without_face += 1,
                    Err(e) => {
                        stats.frame_errors += 1;
                        log::debug!("Face detection failed on frame {}: {e}", frame.index());
                    }
                },
                Err(e) => {
                    stats.frame_errors += 1;
                    log::debug!("Frame decode error: {e}");
                }
            }

            if faces.is_full() {
                break;
            }
            if started.elapsed() >= self.config.timeout {
                stats.truncated = true;
                stats.timed_out = true;
                log::warn!(
                    "{}: extraction exceeded {:?} with {} faces; results may be degraded",
                    path.display(),
                    self.config.timeout,
                    faces.len()
                );
                break;
            }
            if stats.frame_errors >= self.config.max_frame_errors {
                stats.truncated = true;
                log::warn!(
                    "{}: stopping after {} frame errors with {} faces; results may be degraded",
                    path.display(),
                    stats.frame_errors,
                    faces.len()
                );
                break;
            }
        }

        logger.metric("frames_scanned", stats.frames_scanned as f64);
        logger.metric("frames_without_face", stats.frames_without_face as f64);
        logger.metric("frame_errors", stats.frame_errors as f64);

        if faces.is_empty() {
            return Err(if stats.timed_out {
                PredictionError::ExtractionTimedOut(self.config.timeout)
            } else {
                PredictionError::NoFaceDetected
            });
        }

        Ok((faces, stats))
    }

    /// Crop of the first box that survives clamping, if any.
    fn first_face(
        &mut self,
        frame: &Frame,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Option<FaceImage>, Box<dyn std::error::Error>> {
        let t = Instant::now();
        let boxes = self.localizer.detect(frame)?;
        logger.timing("detect", t.elapsed().as_secs_f64() * 1000.0);

        Ok(boxes
            .iter()
            .find_map(|b| b.clamp(frame.width(), frame.height()))
            .and_then(|b| FaceImage::crop(frame, &b)))
    }
}
