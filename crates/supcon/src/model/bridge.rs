//! Tensor bridge: conversions between host buffers (`Vec<f32>` pixels,
//! integer labels) and burn tensors.

use burn::prelude::*;
use burn::tensor::TensorData;
use imageset::ImageShape;

/// Convert a batch of CHW pixel buffers to a burn 4D tensor.
///
/// # Panics
/// Panics if `images` is empty or a buffer does not match `shape`.
pub fn images_to_tensor<B: Backend>(
    images: &[&[f32]],
    shape: ImageShape,
    device: &B::Device,
) -> Tensor<B, 4> {
    assert!(!images.is_empty(), "images must not be empty");
    let len = shape.num_values();
    for (i, img) in images.iter().enumerate() {
        assert_eq!(
            img.len(),
            len,
            "image {i} has length {}, expected {len} for shape {shape}",
            img.len()
        );
    }

    let batch = images.len();
    let flat: Vec<f32> = images.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(
        TensorData::new(flat, [batch, shape.channels, shape.height, shape.width]),
        device,
    )
}

/// Convert class indices to a burn 1D int tensor.
pub fn labels_to_tensor<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_data(TensorData::new(values, [labels.len()]), device)
}

/// Read a 1D int tensor back to host labels.
pub fn tensor_to_labels<B: Backend>(labels: Tensor<B, 1, Int>) -> Vec<i64> {
    labels.into_data().iter::<i64>().collect()
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}
