pub mod device;
pub mod model_factory;
