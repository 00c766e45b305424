use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tempfile::NamedTempFile;

use deepscan_core::classification::domain::verdict::Prediction;
use deepscan_core::classification::infrastructure::onnx_model_factory::OnnxModelFactory;
use deepscan_core::detection::domain::face_localizer::FaceLocalizer;
use deepscan_core::detection::infrastructure::model_store::ModelStore;
use deepscan_core::detection::infrastructure::onnx_yolo_localizer::{
    OnnxYoloLocalizer, DEFAULT_CONFIDENCE,
};
use deepscan_core::execution::execution_controller::{ControllerConfig, ExecutionController};
use deepscan_core::pipeline::detect_deepfake_use_case::{DeepfakeDetector, DetectorConfig};
use deepscan_core::pipeline::extract_faces_use_case::ExtractionConfig;
use deepscan_core::pipeline::prediction_result::PredictionResult;
use deepscan_core::shared::constants::{
    DEFAULT_EXTRACTION_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, MAX_FRAMES, VIDEO_EXTENSIONS,
    YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use deepscan_core::shared::prediction_error::PredictionError;
use deepscan_core::video::domain::video_reader::VideoReader;
use deepscan_core::video::infrastructure::ffmpeg_reader::FfmpegReader;

const EXIT_SERVER_ERROR: i32 = 1;
const EXIT_CLIENT_ERROR: i32 = 2;

/// Marker input that reads the video from standard input.
const STDIN_INPUT: &str = "-";

static DOWNLOADING: AtomicBool = AtomicBool::new(false);

/// Classify videos as real or deepfake.
#[derive(Parser, Debug)]
#[command(name = "deepscan", version)]
struct Cli {
    /// Video files, or "-" to read one video from stdin.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory containing backbone.onnx and temporal_head.safetensors.
    #[arg(long)]
    model_dir: PathBuf,

    /// Faces sampled per video (1-32).
    #[arg(long, default_value_t = MAX_FRAMES)]
    max_frames: usize,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Seconds of inactivity before the classifier is unloaded.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout: u64,

    /// Per-video face extraction timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_EXTRACTION_TIMEOUT_SECS)]
    timeout: u64,

    /// Videos analyzed concurrently.
    #[arg(long, default_value = "1")]
    jobs: usize,

    /// Never use the GPU / accelerator.
    #[arg(long)]
    cpu: bool,

    /// Accept inputs regardless of file extension.
    #[arg(long)]
    any_extension: bool,

    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = validate(&cli) {
        eprintln!("Error: {e}");
        process::exit(EXIT_CLIENT_ERROR);
    }

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_SERVER_ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    // Held until every prediction is done; the temp file is removed on drop.
    let mut stdin_copy: Option<NamedTempFile> = None;
    let mut inputs = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        if input.as_os_str() == STDIN_INPUT {
            let file = spool_stdin()?;
            inputs.push(file.path().to_path_buf());
            stdin_copy = Some(file);
        } else {
            inputs.push(input.clone());
        }
    }

    let detector = build_detector(&cli)?;
    let _reaper = detector.controller().spawn_reaper();

    let outcomes = if cli.jobs > 1 && inputs.len() > 1 {
        predict_parallel(&detector, &inputs, cli.jobs)
    } else {
        inputs.iter().map(|path| detector.predict(path)).collect()
    };

    let labelled = cli.inputs.len() > 1;
    for (input, outcome) in cli.inputs.iter().zip(&outcomes) {
        println!("{}", render(input, outcome, labelled, cli.pretty)?);
    }

    drop(stdin_copy);
    Ok(exit_code(&outcomes))
}

fn build_detector(cli: &Cli) -> Result<DeepfakeDetector, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {YOLO_MODEL_NAME}");
    // A face model shipped next to the classifier takes precedence over a download.
    let store = ModelStore::user_cache()?.with_bundle(&cli.model_dir);
    let localizer_path =
        store.ensure(YOLO_MODEL_NAME, YOLO_MODEL_URL, Some(Box::new(download_progress)))?;
    if DOWNLOADING.load(Ordering::Relaxed) {
        eprintln!();
    }

    let factory = OnnxModelFactory::new(&cli.model_dir)?;
    let controller = Arc::new(ExecutionController::new(
        Box::new(factory),
        ControllerConfig {
            idle_timeout: Duration::from_secs(cli.idle_timeout),
            force_cpu: cli.cpu,
            ..Default::default()
        },
    ));

    let device = controller.primary_device();
    let confidence = cli.confidence;
    let config = DetectorConfig {
        extraction: ExtractionConfig {
            max_frames: cli.max_frames,
            timeout: Duration::from_secs(cli.timeout),
            ..Default::default()
        },
        max_in_flight: cli.jobs.max(1),
    };

    let detector = DeepfakeDetector::new(
        controller,
        config,
        Box::new(|| -> Box<dyn VideoReader> { Box::new(FfmpegReader::new()) }),
        Box::new(move || -> Result<Box<dyn FaceLocalizer>, PredictionError> {
            Ok(Box::new(OnnxYoloLocalizer::new(
                &localizer_path,
                confidence,
                device,
            )?))
        }),
    )?;
    Ok(detector)
}

/// Fan inputs out over `jobs` workers; results come back in input order.
fn predict_parallel(
    detector: &DeepfakeDetector,
    inputs: &[PathBuf],
    jobs: usize,
) -> Vec<Result<Prediction, PredictionError>> {
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &Path)>();
    let (result_tx, result_rx) =
        crossbeam_channel::unbounded::<(usize, Result<Prediction, PredictionError>)>();

    for (i, path) in inputs.iter().enumerate() {
        let _ = job_tx.send((i, path.as_path()));
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..jobs.min(inputs.len()) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (i, path) in job_rx {
                    let _ = result_tx.send((i, detector.predict(path)));
                }
            });
        }
    });
    drop(result_tx);

    let ordered: BTreeMap<usize, _> = result_rx.into_iter().collect();
    ordered.into_values().collect()
}

/// Copy stdin into a temporary file the decoder can seek in.
fn spool_stdin() -> Result<NamedTempFile, Box<dyn std::error::Error>> {
    let mut file = tempfile::Builder::new()
        .prefix("deepscan-stdin-")
        .tempfile()?;
    let bytes = io::copy(&mut io::stdin().lock(), &mut file)?;
    log::debug!("Read {bytes} bytes from stdin into {}", file.path().display());
    Ok(file)
}

fn render(
    input: &Path,
    outcome: &Result<Prediction, PredictionError>,
    labelled: bool,
    pretty: bool,
) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(PredictionResult::from(outcome.clone()))?;
    if labelled {
        if let Value::Object(ref mut map) = value {
            map.insert(
                "input".to_string(),
                Value::String(input.display().to_string()),
            );
        }
    }
    if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
}

/// 0 when every video succeeded, 1 if any failure was on our side,
/// otherwise 2.
fn exit_code(outcomes: &[Result<Prediction, PredictionError>]) -> i32 {
    let mut code = 0;
    for outcome in outcomes {
        match outcome {
            Ok(_) => {}
            Err(e) if e.is_client_error() => code = code.max(EXIT_CLIENT_ERROR),
            Err(_) => return EXIT_SERVER_ERROR,
        }
    }
    code
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let stdin_inputs = cli
        .inputs
        .iter()
        .filter(|p| p.as_os_str() == STDIN_INPUT)
        .count();
    if stdin_inputs > 1 {
        return Err("stdin (\"-\") can be given at most once".into());
    }
    for input in cli.inputs.iter().filter(|p| p.as_os_str() != STDIN_INPUT) {
        if !input.is_file() {
            return Err(format!("Input file not found: {}", input.display()).into());
        }
        if !cli.any_extension && !has_video_extension(input) {
            return Err(format!(
                "Unsupported file type: {} (expected one of: {}; use --any-extension to override)",
                input.display(),
                VIDEO_EXTENSIONS.join(", ")
            )
            .into());
        }
    }
    if !cli.model_dir.is_dir() {
        return Err(format!("Model directory not found: {}", cli.model_dir.display()).into());
    }
    if !(1..=MAX_FRAMES).contains(&cli.max_frames) {
        return Err(format!(
            "Max frames must be between 1 and {MAX_FRAMES}, got {}",
            cli.max_frames
        )
        .into());
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if cli.timeout == 0 {
        return Err("Timeout must be at least 1 second".into());
    }
    if cli.jobs == 0 {
        return Err("Jobs must be at least 1".into());
    }
    Ok(())
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(downloaded: u64, total: u64) {
    DOWNLOADING.store(true, Ordering::Relaxed);
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
