use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::classification::domain::face_normalizer::FaceNormalizer;
use crate::classification::domain::verdict::{self, Prediction};
use crate::detection::domain::face_localizer::FaceLocalizer;
use crate::execution::execution_controller::ExecutionController;
use crate::pipeline::admission_gate::AdmissionGate;
use crate::pipeline::extract_faces_use_case::{ExtractFacesUseCase, ExtractionConfig};
use crate::pipeline::pipeline_logger::{LogPipelineLogger, PipelineLogger};
use crate::shared::constants::DEFAULT_MAX_IN_FLIGHT;
use crate::shared::prediction_error::PredictionError;
use crate::video::domain::video_reader::VideoReader;

/// Builds a fresh decoder for each request.
pub type ReaderFactory = Box<dyn Fn() -> Box<dyn VideoReader> + Send + Sync>;

/// Builds a face localizer; called once up front and again whenever more
/// requests run concurrently than there are idle localizers.
pub type LocalizerFactory =
    Box<dyn Fn() -> Result<Box<dyn FaceLocalizer>, PredictionError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub extraction: ExtractionConfig,
    /// Videos processed at the same time; further requests wait.
    pub max_in_flight: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Video path in, verdict out.
///
/// Composes face extraction, normalization and the controller-managed
/// classifier for one request at a time per admission slot.
pub struct DeepfakeDetector {
    controller: Arc<ExecutionController>,
    normalizer: FaceNormalizer,
    config: DetectorConfig,
    gate: AdmissionGate,
    new_reader: ReaderFactory,
    new_localizer: LocalizerFactory,
    idle_localizers: Mutex<Vec<Box<dyn FaceLocalizer>>>,
}

impl DeepfakeDetector {
    /// Builds the first localizer immediately so detector initialization
    /// problems surface here rather than on the first request.
    pub fn new(
        controller: Arc<ExecutionController>,
        config: DetectorConfig,
        new_reader: ReaderFactory,
        new_localizer: LocalizerFactory,
    ) -> Result<Self, PredictionError> {
        let first = new_localizer()?;
        Ok(Self {
            controller,
            normalizer: FaceNormalizer::default(),
            gate: AdmissionGate::new(config.max_in_flight),
            config,
            new_reader,
            new_localizer,
            idle_localizers: Mutex::new(vec![first]),
        })
    }

    pub fn controller(&self) -> &Arc<ExecutionController> {
        &self.controller
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify one video, logging a per-stage summary at debug level.
    pub fn predict(&self, path: &Path) -> Result<Prediction, PredictionError> {
        let mut logger = LogPipelineLogger::new(path.display().to_string());
        let result = self.predict_with_logger(path, &mut logger);
        logger.summary();
        result
    }

    pub fn predict_with_logger(
        &self,
        path: &Path,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Prediction, PredictionError> {
        let _permit = self.gate.acquire();
        let mut localizer = self.checkout_localizer()?;
        let result = self.run(path, localizer.as_mut(), logger);
        self.idle_localizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(localizer);
        result
    }

    fn run(
        &self,
        path: &Path,
        localizer: &mut dyn FaceLocalizer,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Prediction, PredictionError> {
        let t = Instant::now();
        let (faces, stats) = ExtractFacesUseCase::new(localizer, &self.config.extraction).execute(
            (self.new_reader)(),
            path,
            logger,
        )?;
        logger.timing("extract", elapsed_ms(t));
        if stats.truncated {
            logger.info(&format!(
                "classifying a truncated sequence of {} faces",
                faces.len()
            ));
        }

        let t = Instant::now();
        let tensor = self.normalizer.normalize(&faces)?;
        logger.timing("normalize", elapsed_ms(t));

        let t = Instant::now();
        let output = self.controller.infer(&tensor)?;
        logger.timing("infer", elapsed_ms(t));

        let prediction = verdict::format(&output.scores)?;
        log::debug!(
            "{}: {} ({:.4}) from {} faces",
            path.display(),
            prediction.prediction,
            prediction.confidence,
            faces.len()
        );
        Ok(prediction)
    }

    fn checkout_localizer(&self) -> Result<Box<dyn FaceLocalizer>, PredictionError> {
        let idle = self
            .idle_localizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match idle {
            Some(localizer) => Ok(localizer),
            None => (self.new_localizer)(),
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
