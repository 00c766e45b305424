pub mod classifier_head;
pub mod face_normalizer;
pub mod sequence_classifier;
pub mod sequence_model;
pub mod spatial_encoder;
pub mod temporal_aggregator;
pub mod verdict;
