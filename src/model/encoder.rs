//! Convolutional encoder tower
//!
//! Maps a batch of channels-last images to bounded embedding vectors.

use super::config::{SiameseConfig, CONV_BLOCKS, POOL_SIZE};
use crate::error::Result;
use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

/// Encoder shared by both towers of the Siamese network
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    /// 64@10x10
    conv1: Conv2d<B>,
    /// 128@7x7
    conv2: Conv2d<B>,
    /// 128@4x4
    conv3: Conv2d<B>,
    /// 256@4x4
    conv4: Conv2d<B>,
    /// 2x2 max-pool, stride 2, applied after every convolution
    pool: MaxPool2d,
    /// Flattened features -> embedding
    dense: Linear<B>,
    activation: Relu,
    l2_factor: f64,
}

impl<B: Backend> Encoder<B> {
    /// Create a new encoder with freshly initialized parameters
    pub fn new(device: &B::Device, config: &SiameseConfig) -> Result<Self> {
        let flatten_size = config.flatten_size()?;

        let conv = |in_channels: usize, block_idx: usize| -> Conv2d<B> {
            let block = CONV_BLOCKS[block_idx];
            Conv2dConfig::new(
                [in_channels, block.filters],
                [block.kernel_size, block.kernel_size],
            )
            .with_padding(PaddingConfig2d::Valid)
            .init(device)
        };

        let conv1 = conv(config.input_shape.channels, 0);
        let conv2 = conv(CONV_BLOCKS[0].filters, 1);
        let conv3 = conv(CONV_BLOCKS[1].filters, 2);
        let conv4 = conv(CONV_BLOCKS[2].filters, 3);

        let pool = MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
            .with_strides([POOL_SIZE, POOL_SIZE])
            .init();

        let dense = LinearConfig::new(flatten_size, config.embedding_dim).init(device);

        Ok(Self {
            conv1,
            conv2,
            conv3,
            conv4,
            pool,
            dense,
            activation: Relu::new(),
            l2_factor: config.l2_factor,
        })
    }

    /// Encode a batch of images
    ///
    /// # Arguments
    /// * `images` - `[batch, height, width, channels]`
    ///
    /// # Returns
    /// * `[batch, embedding_dim]`, every value in `[0, 1]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        // Conv2d expects channels-first
        let x = images.permute([0, 3, 1, 2]);

        let x = self.block(&self.conv1, x);
        let x = self.block(&self.conv2, x);
        let x = self.block(&self.conv3, x);
        let x = self.block(&self.conv4, x);

        let x = x.flatten::<2>(1, 3);
        sigmoid(self.dense.forward(x))
    }

    fn block(&self, conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = conv.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }

    /// L2 penalty on the convolution kernels: `l2_factor * sum(w^2)`
    ///
    /// Biases and the dense layer are not regularized.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let sum_sq = |conv: &Conv2d<B>| conv.weight.val().powf_scalar(2.0).sum();

        (sum_sq(&self.conv1) + sum_sq(&self.conv2) + sum_sq(&self.conv3) + sum_sq(&self.conv4))
            .mul_scalar(self.l2_factor)
    }

    /// Embedding size
    pub fn embedding_dim(&self) -> usize {
        self.dense.weight.dims()[1]
    }
}
