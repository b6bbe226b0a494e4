//! Student/teacher encoder: backbone followed by projection head.
//!
//! Both networks of a training session are built from the same
//! [`EncoderConfig`], which sizes the head input from the backbone so the two
//! halves cannot disagree and parameter order is identical across instances.

use burn::prelude::*;

use crate::model::backbone::{BackboneConfig, ConvBackbone};
use crate::model::projection::{ProjectionHead, ProjectionHeadConfig};

/// Configuration for a full encoder.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Feature extractor configuration.
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
    /// Projection head hidden dimension.
    #[config(default = 1024)]
    pub d_hidden: usize,
    /// Embedding dimension.
    #[config(default = 512)]
    pub d_embed: usize,
}

/// Feature extractor plus projection head.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    backbone: ConvBackbone<B>,
    head: ProjectionHead<B>,
}

impl EncoderConfig {
    /// The projection head configuration implied by this encoder.
    pub fn head(&self) -> ProjectionHeadConfig {
        ProjectionHeadConfig::new(self.backbone.feature_dim())
            .with_d_hidden(self.d_hidden)
            .with_d_output(self.d_embed)
    }

    /// Initialize an Encoder with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        Encoder {
            backbone: self.backbone.init(device),
            head: self.head().init(device),
        }
    }
}

impl<B: Backend> Encoder<B> {
    /// Embed a batch of images.
    ///
    /// Input shape: `(batch, channels, H, W)`
    /// Output shape: `(batch, d_embed)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn tiny() -> EncoderConfig {
        EncoderConfig::new()
            .with_backbone(
                BackboneConfig::new()
                    .with_in_channels(1)
                    .with_stem_channels(4)
                    .with_stage_channels(vec![4, 8]),
            )
            .with_d_hidden(6)
            .with_d_embed(3)
    }

    #[test]
    fn test_head_sized_from_backbone() {
        let head = EncoderConfig::new().head();
        assert_eq!(head.d_input, 2048);
        assert_eq!(head.d_hidden, 1024);
        assert_eq!(head.d_output, 512);
        assert_eq!(tiny().head().d_input, 8);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let encoder = tiny().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [5, 1, 8, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(encoder.backbone.forward(images.clone()).dims(), [5, 8]);
        assert_eq!(encoder.forward(images).dims(), [5, 3]);
    }

    #[test]
    fn test_same_config_same_param_count() {
        let device = Default::default();
        let a = tiny().init::<TestBackend>(&device);
        let b = tiny().init::<TestBackend>(&device);
        assert_eq!(a.num_params(), b.num_params());
    }
}
