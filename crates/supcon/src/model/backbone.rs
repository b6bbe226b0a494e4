//! Convolutional feature extractor.
//!
//! A residual CNN that maps `(batch, channels, H, W)` images to pooled
//! `(batch, feature_dim)` features.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Configuration for the convolutional feature extractor.
///
/// ```text
/// (batch, in_channels, H, W)
///   → Conv7x7/2 → BatchNorm → ReLU → MaxPool3x3/2
///   → ResidualBlock per stage (stride 1 first, stride 2 after)
///   → AdaptiveAvgPool(1x1) → squeeze
///   → features: (batch, feature_dim)
/// ```
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Channels of the input images.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Output channels of the stem convolution.
    #[config(default = 64)]
    pub stem_channels: usize,
    /// Output channels of each residual stage. The last entry is the feature dimension.
    #[config(default = "vec![256, 512, 1024, 2048]")]
    pub stage_channels: Vec<usize>,
}

/// Residual block: two 3x3 convolutions with an optional projection shortcut.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    /// Present when stride or channel count changes.
    shortcut: Option<Shortcut<B>>,
}

/// 1x1 projection used when the residual path changes shape.
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

/// Convolutional backbone mapping images to pooled feature vectors.
#[derive(Module, Debug)]
pub struct ConvBackbone<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    avg_pool: AdaptiveAvgPool2d,
    feature_dim: usize,
}

impl BackboneConfig {
    /// Dimension of the pooled feature vector this backbone produces.
    pub fn feature_dim(&self) -> usize {
        self.stage_channels
            .last()
            .copied()
            .unwrap_or(self.stem_channels)
    }

    /// Initialize a ConvBackbone with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBackbone<B> {
        let stem_conv = Conv2dConfig::new([self.in_channels, self.stem_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);

        let mut blocks = Vec::with_capacity(self.stage_channels.len());
        let mut channels = self.stem_channels;
        for (i, &out) in self.stage_channels.iter().enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            blocks.push(ResidualBlock::new(channels, out, stride, device));
            channels = out;
        }

        ConvBackbone {
            stem_conv,
            stem_bn: BatchNormConfig::new(self.stem_channels).init(device),
            stem_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            feature_dim: self.feature_dim(),
        }
    }
}

fn conv3x3<B: Backend>(d_in: usize, d_out: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([d_in, d_out], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

impl<B: Backend> ResidualBlock<B> {
    fn new(d_in: usize, d_out: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || d_in != d_out).then(|| Shortcut {
            conv: Conv2dConfig::new([d_in, d_out], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(d_out).init(device),
        });

        Self {
            conv1: conv3x3(d_in, d_out, stride, device),
            bn1: BatchNormConfig::new(d_out).init(device),
            conv2: conv3x3(d_out, d_out, 1, device),
            bn2: BatchNormConfig::new(d_out).init(device),
            shortcut,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.bn.forward(shortcut.conv.forward(input.clone())),
            None => input.clone(),
        };

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        relu(x + identity)
    }
}

impl<B: Backend> ConvBackbone<B> {
    /// Forward pass: maps images to pooled features.
    ///
    /// Input shape: `(batch, in_channels, H, W)`
    /// Output shape: `(batch, feature_dim)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem_conv.forward(images);
        let x = relu(self.stem_bn.forward(x));
        let mut x = self.stem_pool.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        // Pooling already reduced the spatial extent to 1x1.
        self.avg_pool
            .forward(x)
            .squeeze::<3>(3)
            .squeeze::<2>(2)
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_config() -> BackboneConfig {
        BackboneConfig::new()
            .with_in_channels(1)
            .with_stem_channels(4)
            .with_stage_channels(vec![4, 8])
    }

    #[test]
    fn test_default_feature_dim() {
        assert_eq!(BackboneConfig::new().feature_dim(), 2048);
        assert_eq!(
            BackboneConfig::new()
                .with_stage_channels(vec![])
                .feature_dim(),
            64
        );
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let backbone = tiny_config().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [3, 1, 16, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let features = backbone.forward(images);
        assert_eq!(features.dims(), [3, 8]);
        assert_eq!(backbone.feature_dim(), 8);
    }

    #[test]
    fn test_forward_small_spatial_input() {
        // 8x8 collapses to 1x1 before the last stage.
        let device = Default::default();
        let backbone = tiny_config().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [2, 1, 8, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(backbone.forward(images).dims(), [2, 8]);
    }

    #[test]
    fn test_shortcut_only_when_shape_changes() {
        let device = Default::default();
        let backbone = BackboneConfig::new()
            .with_in_channels(1)
            .with_stem_channels(4)
            .with_stage_channels(vec![4, 4, 8])
            .init::<TestBackend>(&device);
        let has_shortcut: Vec<bool> = backbone
            .blocks
            .iter()
            .map(|b| b.shortcut.is_some())
            .collect();
        assert_eq!(has_shortcut, vec![false, true, true]);
    }

    #[test]
    fn test_gradient_reaches_stem() {
        use burn::optim::GradientsParams;

        let device = Default::default();
        let backbone = tiny_config().init::<TestAutodiffBackend>(&device);
        let images = Tensor::<TestAutodiffBackend, 4>::random(
            [2, 1, 8, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let loss = backbone.forward(images).powf_scalar(2.0).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &backbone);

        let stem_grad = grads
            .get::<NdArray<f32>, 4>(backbone.stem_conv.weight.id)
            .expect("stem conv should have gradient");
        let grad_sum: f32 = stem_grad.abs().sum().into_scalar().elem();
        assert!(grad_sum > 0.0, "stem gradient is zero, gradient not flowing");
    }
}
