//! Two-layer MLP projection head on top of the backbone features.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Configuration for the projection head.
///
/// ```text
/// (batch, d_input) → Linear(d_input→d_hidden) → ReLU → Linear(d_hidden→d_output)
/// ```
#[derive(Config, Debug)]
pub struct ProjectionHeadConfig {
    /// Backbone feature dimension.
    pub d_input: usize,
    /// Hidden layer dimension.
    #[config(default = 1024)]
    pub d_hidden: usize,
    /// Embedding dimension used by the contrastive loss.
    #[config(default = 512)]
    pub d_output: usize,
}

/// Two-layer MLP projecting backbone features into the contrastive space.
///
/// Output is not normalized; the loss normalizes.
#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    pub(crate) linear1: Linear<B>,
    pub(crate) linear2: Linear<B>,
}

impl ProjectionHeadConfig {
    /// Initialize a ProjectionHead with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ProjectionHead<B> {
        ProjectionHead {
            linear1: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            linear2: LinearConfig::new(self.d_hidden, self.d_output).init(device),
        }
    }
}

impl<B: Backend> ProjectionHead<B> {
    /// Input shape: `(batch, d_input)`, output shape: `(batch, d_output)`.
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.linear1.forward(features));
        self.linear2.forward(x)
    }
}
