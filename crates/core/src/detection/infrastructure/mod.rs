pub mod model_store;
pub mod onnx_yolo_localizer;
