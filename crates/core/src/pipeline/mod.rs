pub mod admission_gate;
pub mod detect_deepfake_use_case;
pub mod extract_faces_use_case;
pub mod pipeline_logger;
pub mod prediction_result;
