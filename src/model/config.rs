//! Siamese network configuration

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SiameseError};

/// One convolution + max-pool block of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBlock {
    /// Number of output filters
    pub filters: usize,
    /// Square kernel size
    pub kernel_size: usize,
}

/// Encoder convolution stack: 64@10x10, 128@7x7, 128@4x4, 256@4x4
pub const CONV_BLOCKS: [ConvBlock; 4] = [
    ConvBlock { filters: 64, kernel_size: 10 },
    ConvBlock { filters: 128, kernel_size: 7 },
    ConvBlock { filters: 128, kernel_size: 4 },
    ConvBlock { filters: 256, kernel_size: 4 },
];

/// Pool window and stride of every block
pub const POOL_SIZE: usize = 2;

/// Shape of a single image, channels-last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Batched shape `[batch, height, width, channels]`
    pub fn batched(&self, batch_size: usize) -> [usize; 4] {
        [batch_size, self.height, self.width, self.channels]
    }
}

impl Default for InputShape {
    /// Omniglot: 105x105 grayscale
    fn default() -> Self {
        Self::new(105, 105, 1)
    }
}

impl From<(usize, usize, usize)> for InputShape {
    fn from((height, width, channels): (usize, usize, usize)) -> Self {
        Self::new(height, width, channels)
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// Architecture and construction options of the Siamese network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiameseConfig {
    /// Output units of the classifier head (1 = same/different)
    pub num_classes: usize,
    /// Nominal batch size the model is built for
    pub batch_size: usize,
    /// Shape of one input image
    pub input_shape: InputShape,
    /// Size of the embedding produced by each tower
    pub embedding_dim: usize,
    /// L2 regularization factor on the convolution kernels
    pub l2_factor: f64,
    /// Backend seed applied before parameter initialization
    pub seed: Option<u64>,
}

impl Default for SiameseConfig {
    fn default() -> Self {
        Self {
            num_classes: 1,
            batch_size: 16,
            input_shape: InputShape::default(),
            embedding_dim: 4096,
            l2_factor: 0.01,
            seed: None,
        }
    }
}

impl SiameseConfig {
    /// Configuration of the Omniglot one-shot setup (same as default)
    pub fn omniglot() -> Self {
        Self::default()
    }

    /// Create a new configuration builder
    pub fn builder() -> SiameseConfigBuilder {
        SiameseConfigBuilder::default()
    }

    /// Spatial side lengths after every conv and pool step: `(height, width)`
    ///
    /// Convolutions use valid padding with stride 1, pools floor the division.
    pub fn feature_map_sizes(&self) -> Result<Vec<(usize, usize)>> {
        let mut h = self.input_shape.height;
        let mut w = self.input_shape.width;
        let mut sizes = Vec::with_capacity(CONV_BLOCKS.len() * 2);

        for (idx, block) in CONV_BLOCKS.iter().enumerate() {
            if h < block.kernel_size || w < block.kernel_size {
                return Err(SiameseError::invalid_config(format!(
                    "input {} too small: feature map {}x{} before conv block {} is smaller than its {}x{} kernel",
                    self.input_shape,
                    h,
                    w,
                    idx + 1,
                    block.kernel_size,
                    block.kernel_size
                )));
            }
            h = h - block.kernel_size + 1;
            w = w - block.kernel_size + 1;
            sizes.push((h, w));

            h /= POOL_SIZE;
            w /= POOL_SIZE;
            if h == 0 || w == 0 {
                return Err(SiameseError::invalid_config(format!(
                    "input {} too small: pooling after conv block {} leaves an empty feature map",
                    self.input_shape,
                    idx + 1
                )));
            }
            sizes.push((h, w));
        }

        Ok(sizes)
    }

    /// Length of the flattened feature vector fed to the embedding layer
    pub fn flatten_size(&self) -> Result<usize> {
        let sizes = self.feature_map_sizes()?;
        let (h, w) = sizes[sizes.len() - 1];
        Ok(h * w * CONV_BLOCKS[CONV_BLOCKS.len() - 1].filters)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let result = self.check();
        if let Err(ref e) = result {
            warn!("Rejected Siamese configuration: {}", e);
        }
        result
    }

    fn check(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(SiameseError::invalid_config("num_classes must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(SiameseError::invalid_config("batch_size must be > 0"));
        }
        let shape = &self.input_shape;
        if shape.height == 0 || shape.width == 0 || shape.channels == 0 {
            return Err(SiameseError::invalid_config(format!(
                "input_shape dimensions must be > 0, got {}",
                shape
            )));
        }
        if self.embedding_dim == 0 {
            return Err(SiameseError::invalid_config("embedding_dim must be > 0"));
        }
        if !self.l2_factor.is_finite() || self.l2_factor < 0.0 {
            return Err(SiameseError::invalid_config(format!(
                "l2_factor must be finite and >= 0, got {}",
                self.l2_factor
            )));
        }
        self.flatten_size().map(|_| ())
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        debug!("Loaded Siamese configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Builder for SiameseConfig
#[derive(Debug, Default)]
pub struct SiameseConfigBuilder {
    config: SiameseConfig,
}

impl SiameseConfigBuilder {
    pub fn num_classes(mut self, num_classes: usize) -> Self {
        self.config.num_classes = num_classes;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn input_shape(mut self, shape: impl Into<InputShape>) -> Self {
        self.config.input_shape = shape.into();
        self
    }

    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.config.embedding_dim = embedding_dim;
        self
    }

    pub fn l2_factor(mut self, l2_factor: f64) -> Self {
        self.config.l2_factor = l2_factor;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SiameseConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
