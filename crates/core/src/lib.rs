//! Video deepfake classification: face sampling, sequence normalization and
//! a backbone + LSTM classifier behind a resource-aware execution controller.

pub mod classification;
pub mod detection;
pub mod execution;
pub mod pipeline;
pub mod shared;
pub mod video;
