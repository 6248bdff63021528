//! # Siamese One-Shot Library
//!
//! Siamese convolutional network for one-shot image classification
//! (Omniglot-style 105x105 grayscale characters).
//!
//! Two images are encoded by the same convolutional tower, the absolute
//! difference of their embeddings is taken, and a sigmoid unit scores whether
//! both images belong to the same class.
//!
//! ## Modules
//!
//! - `model` - Encoder, Siamese network, configuration, loss and metrics
//! - `error` - Error types
//!
//! ## Example
//!
//! ```no_run
//! use burn::tensor::Tensor;
//! use burn_ndarray::NdArray;
//! use siamese_oneshot::{SiameseConfig, SiameseNetwork};
//!
//! type Backend = NdArray<f32>;
//!
//! let device = Default::default();
//! let config = SiameseConfig::builder().batch_size(1).seed(42).build()?;
//! let model: SiameseNetwork<Backend> = SiameseNetwork::new(&device, &config)?;
//!
//! let first = Tensor::<Backend, 4>::zeros([1, 105, 105, 1], &device);
//! let second = Tensor::<Backend, 4>::zeros([1, 105, 105, 1], &device);
//! let score = model.forward(first, second);
//! assert_eq!(score.dims(), [1, 1]);
//! # Ok::<(), siamese_oneshot::SiameseError>(())
//! ```

pub mod error;
pub mod model;

// Re-export commonly used types
pub use error::{Result, SiameseError};
pub use model::{
    ImagePair, InputShape, SiameseConfig, SiameseNetwork, SiameseOutput, TrainingConfig,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Result, SiameseError};
    pub use crate::model::{
        l1_distance, Encoder, ImagePair, InputShape, SiameseConfig, SiameseNetwork,
        SiameseOutput, TrainingConfig,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default image side length (Omniglot)
pub const DEFAULT_IMAGE_SIZE: usize = 105;

/// Default embedding size
pub const DEFAULT_EMBEDDING_DIM: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SiameseConfig::default();
        assert_eq!(config.input_shape.height, DEFAULT_IMAGE_SIZE);
        assert_eq!(config.input_shape.width, DEFAULT_IMAGE_SIZE);
        assert_eq!(config.embedding_dim, DEFAULT_EMBEDDING_DIM);
    }
}
