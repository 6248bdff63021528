//! Siamese network: shared encoder, L1 distance, sigmoid classifier

use std::fmt;

use super::config::SiameseConfig;
use super::encoder::Encoder;
use crate::error::{Result, SiameseError};
use burn::{
    module::{Ignored, Module},
    nn::{Linear, LinearConfig},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};
use tracing::{debug, info};

/// Element-wise absolute difference of two embedding batches
pub fn l1_distance<B: Backend>(first: Tensor<B, 2>, second: Tensor<B, 2>) -> Tensor<B, 2> {
    (first - second).abs()
}

/// Ordered pair of image batches, each `[batch, height, width, channels]`
#[derive(Debug, Clone)]
pub struct ImagePair<B: Backend> {
    pub first: Tensor<B, 4>,
    pub second: Tensor<B, 4>,
}

impl<B: Backend> ImagePair<B> {
    pub fn new(first: Tensor<B, 4>, second: Tensor<B, 4>) -> Self {
        Self { first, second }
    }

    /// The same pair in reverse order
    pub fn swapped(self) -> Self {
        Self {
            first: self.second,
            second: self.first,
        }
    }
}

impl<B: Backend> From<[Tensor<B, 4>; 2]> for ImagePair<B> {
    fn from([first, second]: [Tensor<B, 4>; 2]) -> Self {
        Self::new(first, second)
    }
}

impl<B: Backend> From<(Tensor<B, 4>, Tensor<B, 4>)> for ImagePair<B> {
    fn from((first, second): (Tensor<B, 4>, Tensor<B, 4>)) -> Self {
        Self::new(first, second)
    }
}

/// Intermediate results of one forward pass
#[derive(Debug, Clone)]
pub struct SiameseOutput<B: Backend> {
    /// Embedding of the first image batch
    pub first_embedding: Tensor<B, 2>,
    /// Embedding of the second image batch
    pub second_embedding: Tensor<B, 2>,
    /// `|first_embedding - second_embedding|`
    pub distance: Tensor<B, 2>,
    /// Similarity scores `[batch, num_classes]`
    pub scores: Tensor<B, 2>,
}

/// Siamese network for one-shot image comparison
///
/// Both images of a pair go through the single `encoder` field, so the two
/// towers always share one parameter set.
#[derive(Module, Debug)]
pub struct SiameseNetwork<B: Backend> {
    /// Shared encoder tower
    encoder: Encoder<B>,
    /// Distance vector -> similarity logits
    classifier: Linear<B>,
    config: Ignored<SiameseConfig>,
}

impl<B: Backend> SiameseNetwork<B> {
    /// Create a new model, rejecting invalid configuration eagerly
    pub fn new(device: &B::Device, config: &SiameseConfig) -> Result<Self> {
        config.validate()?;

        if let Some(seed) = config.seed {
            B::seed(seed);
        }

        let encoder = Encoder::new(device, config)?;
        let classifier = LinearConfig::new(config.embedding_dim, config.num_classes).init(device);

        let model = Self {
            encoder,
            classifier,
            config: Ignored(config.clone()),
        };

        info!(
            "Built {} for input {} (batch_size={}, embedding_dim={})",
            model,
            config.input_shape,
            config.batch_size,
            config.embedding_dim
        );
        info!(
            "Parameters: encoder={}, classifier={}",
            model.encoder.num_params(),
            model.classifier.num_params()
        );

        Ok(model)
    }

    /// Similarity scores for a pair of image batches
    ///
    /// # Arguments
    /// * `first`, `second` - `[batch, height, width, channels]`
    ///
    /// # Returns
    /// * `[batch, num_classes]`, every value in `[0, 1]`
    ///
    /// Shape errors surface from the tensor backend; use [`Self::try_forward`]
    /// to check shapes up front.
    pub fn forward(&self, first: Tensor<B, 4>, second: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_detailed(first, second).scores
    }

    /// Same as [`Self::forward`] for an ordered pair
    pub fn forward_pair(&self, pair: impl Into<ImagePair<B>>) -> Tensor<B, 2> {
        let pair = pair.into();
        self.forward(pair.first, pair.second)
    }

    /// Forward pass after validating both batch shapes
    pub fn try_forward(&self, first: Tensor<B, 4>, second: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let first_dims = first.dims();
        let second_dims = second.dims();

        self.check_input(first_dims)?;
        if first_dims != second_dims {
            return Err(SiameseError::ShapeMismatch {
                expected: first_dims.to_vec(),
                actual: second_dims.to_vec(),
            });
        }

        Ok(self.forward(first, second))
    }

    /// Forward pass returning embeddings and distance alongside the scores
    pub fn forward_detailed(&self, first: Tensor<B, 4>, second: Tensor<B, 4>) -> SiameseOutput<B> {
        debug!(
            "Siamese forward: first={:?}, second={:?}",
            first.dims(),
            second.dims()
        );

        let first_embedding = self.encoder.forward(first);
        let second_embedding = self.encoder.forward(second);

        let distance = l1_distance(first_embedding.clone(), second_embedding.clone());
        let scores = sigmoid(self.classifier.forward(distance.clone()));

        SiameseOutput {
            first_embedding,
            second_embedding,
            distance,
            scores,
        }
    }

    /// Embed a batch of images with the shared encoder
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.encoder.forward(images)
    }

    /// Output shape `[batch, num_classes]` for an input batch shape
    pub fn output_shape(&self, input_shape: [usize; 4]) -> Result<[usize; 2]> {
        self.check_input(input_shape)?;
        Ok([input_shape[0], self.config.num_classes])
    }

    /// Output shape for the configured batch size
    pub fn default_output_shape(&self) -> [usize; 2] {
        [self.config.batch_size, self.config.num_classes]
    }

    fn check_input(&self, dims: [usize; 4]) -> Result<()> {
        let expected = self.config.input_shape.batched(dims[0]);
        if dims[0] == 0 || dims != expected {
            return Err(SiameseError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: dims.to_vec(),
            });
        }
        Ok(())
    }

    /// Shared encoder
    pub fn encoder(&self) -> &Encoder<B> {
        &self.encoder
    }

    /// L2 penalty of the encoder's convolution kernels
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        self.encoder.l2_penalty()
    }

    /// Model configuration
    pub fn config(&self) -> &SiameseConfig {
        &self.config
    }
}

impl<B: Backend> fmt::Display for SiameseNetwork<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiameseNetwork(num_classes={})", self.config.num_classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_config() -> SiameseConfig {
        SiameseConfig::builder()
            .input_shape((80, 80, 1))
            .embedding_dim(64)
            .batch_size(2)
            .build()
            .unwrap()
    }

    fn random_images(batch: usize, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::random([batch, 80, 80, 1], Distribution::Uniform(0.0, 1.0), device)
    }

    #[test]
    fn test_l1_distance() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1f32, 0.9, 0.5, 0.0], [2, 2]),
            &device,
        );
        let b = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.4f32, 0.2, 0.5, 1.0], [2, 2]),
            &device,
        );

        let distance: Vec<f32> = l1_distance(a, b).into_data().to_vec().unwrap();
        let expected = [0.3f32, 0.7, 0.0, 1.0];
        for (d, e) in distance.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(d, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_forward_pass() {
        let device = Default::default();
        let model: SiameseNetwork<TestBackend> =
            SiameseNetwork::new(&device, &small_config()).unwrap();

        let scores = model.forward(random_images(2, &device), random_images(2, &device));
        assert_eq!(scores.dims(), [2, 1]);
    }

    #[test]
    fn test_forward_pair_matches_forward() {
        let device = Default::default();
        let model: SiameseNetwork<TestBackend> =
            SiameseNetwork::new(&device, &small_config()).unwrap();

        let a = random_images(2, &device);
        let b = random_images(2, &device);

        let direct: Vec<f32> = model.forward(a.clone(), b.clone()).into_data().to_vec().unwrap();
        let paired: Vec<f32> = model.forward_pair([a, b]).into_data().to_vec().unwrap();
        assert_eq!(direct, paired);
    }

    #[test]
    fn test_classifier_consumes_distance() {
        let device = Default::default();
        let model: SiameseNetwork<TestBackend> =
            SiameseNetwork::new(&device, &small_config()).unwrap();

        let output = model.forward_detailed(random_images(2, &device), random_images(2, &device));
        let from_distance: Vec<f32> = sigmoid(model.classifier.forward(output.distance))
            .into_data()
            .to_vec()
            .unwrap();
        let scores: Vec<f32> = output.scores.into_data().to_vec().unwrap();

        assert_eq!(scores, from_distance);
    }

    #[test]
    fn test_try_forward_rejects_bad_shapes() {
        let device = Default::default();
        let model: SiameseNetwork<TestBackend> =
            SiameseNetwork::new(&device, &small_config()).unwrap();

        let wrong_size = Tensor::<TestBackend, 4>::zeros([2, 81, 80, 1], &device);
        let result = model.try_forward(wrong_size, random_images(2, &device));
        assert!(matches!(result, Err(SiameseError::ShapeMismatch { .. })));

        let result = model.try_forward(random_images(2, &device), random_images(3, &device));
        assert!(matches!(result, Err(SiameseError::ShapeMismatch { .. })));

        let result = model.try_forward(random_images(3, &device), random_images(3, &device));
        assert_eq!(result.unwrap().dims(), [3, 1]);
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let config = SiameseConfig::builder()
            .input_shape((80, 80, 1))
            .embedding_dim(64)
            .num_classes(4)
            .batch_size(8)
            .build()
            .unwrap();
        let model: SiameseNetwork<TestBackend> = SiameseNetwork::new(&device, &config).unwrap();

        assert_eq!(model.output_shape([3, 80, 80, 1]).unwrap(), [3, 4]);
        assert_eq!(model.default_output_shape(), [8, 4]);
        assert!(model.output_shape([3, 80, 80, 3]).is_err());
        assert!(model.output_shape([0, 80, 80, 1]).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let device = Default::default();
        let mut config = small_config();
        config.num_classes = 0;

        let result: Result<SiameseNetwork<TestBackend>> = SiameseNetwork::new(&device, &config);
        assert!(matches!(result, Err(SiameseError::InvalidConfig(_))));
    }

    #[test]
    fn test_display() {
        let device = Default::default();
        let model: SiameseNetwork<TestBackend> =
            SiameseNetwork::new(&device, &small_config()).unwrap();
        assert_eq!(model.to_string(), "SiameseNetwork(num_classes=1)");
    }
}
