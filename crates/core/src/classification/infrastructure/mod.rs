pub mod onnx_model_factory;
pub mod onnx_spatial_encoder;
pub mod temporal_head_weights;
