use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::shared::frame::Frame;
use crate::shared::prediction_error::PredictionError;

use super::video_reader::{FrameResult, VideoReader};

/// Owns an opened [`VideoReader`] and closes it when dropped.
///
/// Whatever path the caller leaves by (end of stream, early stop, error
/// return, panic unwind), the decoder is released.
pub struct FrameSampler {
    reader: Box<dyn VideoReader>,
    path: PathBuf,
    deadline: Option<Deadline>,
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Option<Self> {
        Instant::now()
            .checked_add(budget)
            .map(|at| Self { at, budget })
    }

    fn passed(&self) -> bool {
        Instant::now() >= self.at
    }
}

impl FrameSampler {
    /// Opens `path`, failing with `VideoUnreadable` if the decoder cannot.
    ///
    /// With a `timeout`, the reader is told to give up once it has elapsed;
    /// an open or first read cut short that way is `ExtractionTimedOut`.
    pub fn open(
        mut reader: Box<dyn VideoReader>,
        path: &Path,
        timeout: Option<Duration>,
    ) -> Result<Self, PredictionError> {
        let deadline = timeout.and_then(Deadline::start);
        reader.set_deadline(deadline.map(|d| d.at));

        match reader.open(path) {
            Ok(metadata) => {
                log::debug!(
                    "Opened {} ({}x{}, {:.2} fps, {}, codec {}, rotation {})",
                    path.display(),
                    metadata.width,
                    metadata.height,
                    metadata.fps,
                    metadata
                        .duration_secs()
                        .map(|secs| format!("{secs:.1}s"))
                        .unwrap_or_else(|| "unknown duration".to_string()),
                    metadata.codec,
                    metadata.rotation
                );
                Ok(Self {
                    reader,
                    path: path.to_path_buf(),
                    deadline,
                })
            }
            Err(e) => {
                reader.close();
                if let Some(d) = deadline.filter(Deadline::passed) {
                    return Err(PredictionError::ExtractionTimedOut(d.budget));
                }
                Err(PredictionError::VideoUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Starts decoding.
    ///
    /// The first frame is read eagerly: a stream that opens but cannot
    /// produce it is `VideoCorruptOrEmpty`, or `ExtractionTimedOut` if the
    /// deadline cut the read short.
    pub fn frames(&mut self) -> Result<SampledFrames<'_>, PredictionError> {
        let deadline = self.deadline;
        let path = self.path.display().to_string();
        let mut inner = self.reader.frames();
        let failure = match inner.next() {
            Some(Ok(frame)) => {
                return Ok(SampledFrames {
                    first: Some(frame),
                    inner,
                })
            }
            Some(Err(e)) => format!("{path}: first frame failed to decode: {e}"),
            None => format!("{path}: stream ended before the first frame"),
        };
        match deadline.filter(Deadline::passed) {
            Some(d) => Err(PredictionError::ExtractionTimedOut(d.budget)),
            None => Err(PredictionError::VideoCorruptOrEmpty(failure)),
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.reader.close();
    }
}

/// Frames in decode order, starting with the validated first frame.
pub struct SampledFrames<'a> {
    first: Option<Frame>,
    inner: Box<dyn Iterator<Item = FrameResult> + 'a>,
}

impl Iterator for SampledFrames<'_> {
    type Item = FrameResult;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(frame) = self.first.take() {
            return Some(Ok(frame));
        }
        self.inner.next()
    }
}
