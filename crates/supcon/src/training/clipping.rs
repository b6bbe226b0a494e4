//! Elementwise gradient value clipping.
//!
//! Walks the module's float parameters and clamps each gradient to
//! `[-limit, limit]` before the optimizer step.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Clamps every registered gradient of the visited parameters elementwise.
struct ValueClipper<'a> {
    grads: &'a mut GradientsParams,
    limit: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ValueClipper<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.clamp(-self.limit, self.limit));
        }
    }
}

/// Clip gradient values (not norms) of `module`'s parameters to `[-limit, limit]`.
pub fn clip_gradient_values<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    mut grads: GradientsParams,
    limit: f64,
) -> GradientsParams {
    let mut clipper = ValueClipper {
        grads: &mut grads,
        limit,
    };
    module.visit(&mut clipper);
    grads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::projection::ProjectionHeadConfig;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_gradients_clamped_to_limit() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(8)
            .with_d_hidden(16)
            .with_d_output(4)
            .init::<TestAutodiffBackend>(&device);
        let input = Tensor::<TestAutodiffBackend, 2>::random(
            [32, 8],
            Distribution::Normal(0.0, 10.0),
            &device,
        );
        // Large loss so raw gradients exceed the limit
        let loss = head.forward(input).powf_scalar(2.0).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &head);

        let raw_max: f32 = grads
            .get::<NdArray<f32>, 2>(head.linear2.weight.id)
            .expect("linear2 weight should have gradient")
            .abs()
            .max()
            .into_scalar()
            .elem();
        assert!(raw_max > 0.1, "test needs raw gradients above the limit, got {raw_max}");

        let grads = clip_gradient_values(&head, grads, 0.1);
        for id in [
            head.linear1.weight.id,
            head.linear2.weight.id,
        ] {
            let g = grads
                .get::<NdArray<f32>, 2>(id)
                .expect("weight gradient should survive clipping");
            let max: f32 = g.abs().max().into_scalar().elem();
            assert!(max <= 0.1 + 1e-7, "gradient element {max} exceeds 0.1");
        }
        let bias_grad = grads
            .get::<NdArray<f32>, 1>(head.linear2.bias.as_ref().unwrap().id)
            .expect("bias gradient should survive clipping");
        let max: f32 = bias_grad.abs().max().into_scalar().elem();
        assert!(max <= 0.1 + 1e-7, "bias gradient element {max} exceeds 0.1");
    }

    #[test]
    fn test_small_gradients_untouched() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(4)
            .with_d_hidden(4)
            .with_d_output(2)
            .init::<TestAutodiffBackend>(&device);
        let input = Tensor::<TestAutodiffBackend, 2>::random(
            [2, 4],
            Distribution::Normal(0.0, 1e-3),
            &device,
        );
        let loss = head.forward(input).sum().mul_scalar(1e-3);
        let grads = GradientsParams::from_grads(loss.backward(), &head);
        let before: Vec<f32> = grads
            .get::<NdArray<f32>, 2>(head.linear2.weight.id)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();

        let grads = clip_gradient_values(&head, grads, 0.1);
        let after: Vec<f32> = grads
            .get::<NdArray<f32>, 2>(head.linear2.weight.id)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(before, after);
    }
}
