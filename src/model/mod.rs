//! # Siamese network model
//!
//! Shared convolutional encoder, L1 distance and sigmoid classifier, built on
//! the Burn framework.

mod config;
mod encoder;
mod siamese;
mod training;

pub use config::{ConvBlock, InputShape, SiameseConfig, SiameseConfigBuilder, CONV_BLOCKS, POOL_SIZE};
pub use encoder::Encoder;
pub use siamese::{l1_distance, ImagePair, SiameseNetwork, SiameseOutput};
pub use training::{
    binary_accuracy, binary_cross_entropy, evaluate_batch, regularized_loss, EvaluationMetrics,
    TrainingConfig,
};
