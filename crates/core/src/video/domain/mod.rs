pub mod frame_sampler;
pub mod video_reader;
