//! Loss, metric and optimizer settings for training the Siamese network
//!
//! The training loop itself belongs to the caller; this module only provides
//! the pieces it consumes: binary cross-entropy on the similarity scores, the
//! L2 penalty of the encoder, binary accuracy and the Adam configuration.

use super::siamese::{ImagePair, SiameseNetwork};
use burn::{
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::AdamConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs
const EPSILON: f64 = 1e-7;

/// Optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Adam learning rate
    pub learning_rate: f64,
    /// Adam first moment decay
    pub beta_1: f32,
    /// Adam second moment decay
    pub beta_2: f32,
    /// Adam numerical stability term
    pub epsilon: f32,
    /// Threshold above which a score counts as "same class"
    pub decision_threshold: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            decision_threshold: 0.5,
        }
    }
}

impl TrainingConfig {
    /// Adam optimizer configuration
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
    }
}

/// Loss and accuracy of one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationMetrics {
    /// Binary cross-entropy plus L2 penalty
    pub loss: f32,
    /// Binary accuracy
    pub accuracy: f32,
}

/// Mean binary cross-entropy between similarity scores and 0/1 targets
///
/// # Arguments
/// * `scores` - probabilities `[batch, num_classes]` as returned by the model
/// * `targets` - `1` for "same class", `0` otherwise, same shape as `scores`
pub fn binary_cross_entropy<B: Backend>(
    scores: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let device = scores.device();
    let scores = scores.clamp(EPSILON, 1.0 - EPSILON);

    BinaryCrossEntropyLossConfig::new()
        .init(&device)
        .forward(scores, targets)
}

/// Fraction of scores on the correct side of `threshold`
pub fn binary_accuracy<B: Backend>(
    scores: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
    threshold: f64,
) -> f32 {
    let total = scores.dims().iter().product::<usize>();
    if total == 0 {
        return 0.0;
    }

    let predictions = scores.greater_elem(threshold).int();
    let correct = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<f32>();

    correct / total as f32
}

/// Binary cross-entropy of a pair batch plus the encoder's L2 penalty
pub fn regularized_loss<B: Backend>(
    model: &SiameseNetwork<B>,
    pair: impl Into<ImagePair<B>>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let scores = model.forward_pair(pair);
    binary_cross_entropy(scores, targets) + model.l2_penalty()
}

/// Loss and accuracy of the model on one labelled pair batch
pub fn evaluate_batch<B: Backend>(
    model: &SiameseNetwork<B>,
    pair: impl Into<ImagePair<B>>,
    targets: Tensor<B, 2, Int>,
    config: &TrainingConfig,
) -> EvaluationMetrics {
    let scores = model.forward_pair(pair);

    let loss = (binary_cross_entropy(scores.clone(), targets.clone()) + model.l2_penalty())
        .into_scalar()
        .elem::<f32>();
    let accuracy = binary_accuracy(scores, targets, config.decision_threshold);

    debug!("Batch evaluation: loss={:.4}, accuracy={:.4}", loss, accuracy);

    EvaluationMetrics { loss, accuracy }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SiameseConfig;
    use approx::assert_abs_diff_eq;
    use burn::{
        backend::Autodiff,
        module::Module,
        optim::{GradientsParams, Optimizer},
        tensor::{Distribution, TensorData},
    };
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn scores(values: Vec<f32>, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2> {
        let n = values.len();
        Tensor::from_data(TensorData::new(values, [n, 1]), device)
    }

    fn targets(values: Vec<i64>, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2, Int> {
        let n = values.len();
        Tensor::from_data(TensorData::new(values, [n, 1]), device)
    }

    #[test]
    fn test_default_training_config() {
        let config = TrainingConfig::default();
        assert_abs_diff_eq!(config.learning_rate, 1e-3);
        assert_abs_diff_eq!(config.decision_threshold, 0.5);
    }

    #[test]
    fn test_binary_cross_entropy() {
        let device = Default::default();

        let loss: f32 = binary_cross_entropy(
            scores(vec![0.5, 0.5], &device),
            targets(vec![1, 0], &device),
        )
        .into_scalar();
        assert_abs_diff_eq!(loss, std::f32::consts::LN_2, epsilon = 1e-5);

        let good: f32 = binary_cross_entropy(
            scores(vec![0.9, 0.1], &device),
            targets(vec![1, 0], &device),
        )
        .into_scalar();
        let bad: f32 = binary_cross_entropy(
            scores(vec![0.1, 0.9], &device),
            targets(vec![1, 0], &device),
        )
        .into_scalar();
        assert!(good < bad);
    }

    #[test]
    fn test_binary_cross_entropy_saturated_scores_stay_finite() {
        let device = Default::default();
        let loss: f32 = binary_cross_entropy(
            scores(vec![1.0, 0.0], &device),
            targets(vec![0, 1], &device),
        )
        .into_scalar();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_binary_accuracy() {
        let device = Default::default();
        let accuracy = binary_accuracy(
            scores(vec![0.9, 0.2, 0.6, 0.4], &device),
            targets(vec![1, 0, 0, 0], &device),
            0.5,
        );
        assert_abs_diff_eq!(accuracy, 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_evaluate_batch() {
        let device = Default::default();
        let config = SiameseConfig::builder()
            .input_shape((80, 80, 1))
            .embedding_dim(16)
            .build()
            .unwrap();
        let model: SiameseNetwork<TestBackend> = SiameseNetwork::new(&device, &config).unwrap();

        let images = Tensor::<TestBackend, 4>::random(
            [2, 80, 80, 1],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let metrics = evaluate_batch(
            &model,
            [images.clone(), images],
            targets(vec![1, 1], &device),
            &TrainingConfig::default(),
        );

        assert!(metrics.loss.is_finite());
        assert!(metrics.loss > 0.0);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
    }

    #[test]
    fn test_optimizer_step_updates_shared_encoder() {
        let device = Default::default();
        let config = SiameseConfig::builder()
            .input_shape((80, 80, 1))
            .embedding_dim(16)
            .build()
            .unwrap();
        let training = TrainingConfig::default();

        let model: SiameseNetwork<TestAutodiffBackend> =
            SiameseNetwork::new(&device, &config).unwrap();
        let first = Tensor::<TestAutodiffBackend, 4>::random(
            [2, 80, 80, 1],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let second = Tensor::<TestAutodiffBackend, 4>::random(
            [2, 80, 80, 1],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let labels = Tensor::<TestAutodiffBackend, 2, Int>::from_data(
            TensorData::new(vec![1i64, 0], [2, 1]),
            &device,
        );

        let before: Vec<f32> = model.l2_penalty().into_data().to_vec().unwrap();

        let loss = regularized_loss(&model, [first, second], labels);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let mut optimizer = training.optimizer().init();
        let model = optimizer.step(training.learning_rate, model, grads);

        let after: Vec<f32> = model.l2_penalty().into_data().to_vec().unwrap();
        assert_ne!(before, after);
        assert_eq!(model.num_params(), model.encoder().num_params() + 16 + 1);
    }
}
