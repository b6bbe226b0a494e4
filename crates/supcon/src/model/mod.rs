//! Encoder components: convolutional backbone, projection head, the combined
//! encoder, and the tensor bridge between host buffers and burn tensors.

pub mod backbone;
pub mod bridge;
pub mod encoder;
pub mod projection;
