pub mod bounding_box;
pub mod constants;
pub mod face_image;
pub mod frame;
pub mod prediction_error;
pub mod video_metadata;
