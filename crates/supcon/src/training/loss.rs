//! Supervised contrastive loss of student embeddings against the memory queue.
//!
//! Generic over `B: Backend`. Gradients flow through the batch embeddings
//! only; queue tensors come from the teacher and carry no graph.

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

/// Lower bound on the norm used by [`l2_normalize`].
pub const NORM_EPS: f64 = 1e-12;

/// Row-wise L2 normalization: `x / max(||x||, NORM_EPS)`.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(NORM_EPS);
    x / norm
}

/// Supervised contrastive loss between a batch and the queue.
///
/// ```text
/// gram      = normalize(x) @ normalize(queue)^T / t          (N1, N2)
/// mask[i,j] = label_i * queue_label_j                         (N1, N2)
/// loss      = -Σ mask * log_softmax(gram, dim=1) / Σ mask
/// ```
///
/// The mask is the numeric outer product of label values, not a same-class
/// indicator: pairs involving class 0 carry zero weight and other pairs are
/// weighted by the product of their class indices.
///
/// # Arguments
/// - `embeddings`: shape `(N1, D)`, student embeddings, not normalized
/// - `labels`: shape `(N1,)`
/// - `queue_embeddings`: shape `(N2, D)`
/// - `queue_labels`: shape `(N2,)`
/// - `temperature`: softmax temperature `t > 0`
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`. Non-finite when `Σ mask == 0`; see
/// [`label_mask_weight`] to detect that case up front.
pub fn supervised_contrastive_loss<B: Backend>(
    embeddings: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
    queue_embeddings: Tensor<B, 2>,
    queue_labels: Tensor<B, 1, Int>,
    temperature: f64,
) -> Tensor<B, 1> {
    let x = l2_normalize(embeddings);
    let queue = l2_normalize(queue_embeddings);
    let gram = x.matmul(queue.transpose()).div_scalar(temperature); // (N1, N2)

    let label_mask = labels
        .float()
        .unsqueeze_dim::<2>(1)
        .matmul(queue_labels.float().unsqueeze_dim::<2>(0)); // (N1, N2)

    let log_probs = log_softmax(gram, 1);
    (label_mask.clone() * log_probs).sum().neg() / label_mask.sum()
}

/// Denominator of [`supervised_contrastive_loss`] computed on the host.
///
/// `Σ_ij label_i * queue_label_j` factorizes into `Σ label_i * Σ queue_label_j`.
pub fn label_mask_weight(batch_labels: &[i64], queue_label_sum: f64) -> f64 {
    let batch_sum: f64 = batch_labels.iter().map(|&l| l as f64).sum();
    batch_sum * queue_label_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn labels<B: Backend>(values: &[i64]) -> Tensor<B, 1, Int> {
        Tensor::from_data(
            TensorData::new(values.to_vec(), [values.len()]),
            &Default::default(),
        )
    }

    #[test]
    fn test_normalize_unit_rows() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[3.0_f32, 4.0], [0.0, -2.0]]),
            &device,
        );
        let n: Vec<f32> = l2_normalize(x).into_data().to_vec().unwrap();
        let expected = [0.6, 0.8, 0.0, -1.0];
        for (a, b) in n.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "expected {b}, got {a}");
        }
    }

    #[test]
    fn test_normalize_zero_row_stays_finite() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let n: Vec<f32> = l2_normalize(x).into_data().to_vec().unwrap();
        assert!(n.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_known_value() {
        // One sample of class 1, queue = [same direction, orthogonal], both class 1, t = 1.
        // log p = [1 - ln(e + 1), -ln(e + 1)], mask = [1, 1]
        // loss = (2 ln(1 + e) - 1) / 2
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::from([[2.0_f32, 0.0]]), &device);
        let q = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[5.0_f32, 0.0], [0.0, 1.0]]),
            &device,
        );
        let loss: f32 = supervised_contrastive_loss(x, labels(&[1]), q, labels(&[1, 1]), 1.0)
            .into_scalar()
            .elem();
        let expected = (2.0 * (1.0_f32 + std::f32::consts::E).ln() - 1.0) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "expected {expected}, got {loss}");
    }

    #[test]
    fn test_invariant_to_positive_rescaling() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let q = Tensor::<TestBackend, 2>::random([6, 8], Distribution::Normal(0.0, 1.0), &device);
        let y = labels::<TestBackend>(&[1, 2, 0, 2]);
        let qy = labels::<TestBackend>(&[0, 1, 1, 2, 2, 2]);

        let base: f32 =
            supervised_contrastive_loss(x.clone(), y.clone(), q.clone(), qy.clone(), 0.5)
                .into_scalar()
                .elem();
        for k in [0.01_f32, 3.0, 250.0] {
            let scaled: f32 = supervised_contrastive_loss(
                x.clone().mul_scalar(k),
                y.clone(),
                q.clone(),
                qy.clone(),
                0.5,
            )
            .into_scalar()
            .elem();
            assert!(
                (scaled - base).abs() < 1e-4,
                "loss changed under rescaling by {k}: {base} vs {scaled}"
            );
        }
    }

    #[test]
    fn test_class_zero_rows_carry_no_weight() {
        let device = Default::default();
        let q = Tensor::<TestBackend, 2>::random([5, 4], Distribution::Normal(0.0, 1.0), &device);
        let qy = labels::<TestBackend>(&[0, 0, 1, 1, 2]);
        let class1 =
            Tensor::<TestBackend, 2>::random([1, 4], Distribution::Normal(0.0, 1.0), &device);

        let loss_for = |class0_row: Tensor<TestBackend, 2>| -> f32 {
            let x = Tensor::cat(vec![class0_row, class1.clone()], 0);
            supervised_contrastive_loss(x, labels(&[0, 1]), q.clone(), qy.clone(), 1.0)
                .into_scalar()
                .elem()
        };

        let a = loss_for(Tensor::random([1, 4], Distribution::Normal(0.0, 1.0), &device));
        let b = loss_for(Tensor::random([1, 4], Distribution::Normal(5.0, 1.0), &device));
        assert!((a - b).abs() < 1e-5, "class-0 sample changed the loss: {a} vs {b}");
    }

    #[test]
    fn test_degenerate_mask_is_non_finite() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([2, 4], Distribution::Normal(0.0, 1.0), &device);
        let q = Tensor::<TestBackend, 2>::random([3, 4], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(label_mask_weight(&[0, 0], 3.0), 0.0);
        let loss: f32 = supervised_contrastive_loss(x, labels(&[0, 0]), q, labels(&[1, 1, 1]), 1.0)
            .into_scalar()
            .elem();
        assert!(!loss.is_finite(), "zero mask weight should give a non-finite loss, got {loss}");
    }

    #[test]
    fn test_mask_weight_factorizes() {
        // [1, 2] x [0, 1, 1, 3] → (1 + 2) * (0 + 1 + 1 + 3) = 15
        assert_eq!(label_mask_weight(&[1, 2], 5.0), 15.0);
        assert_eq!(label_mask_weight(&[], 5.0), 0.0);
    }

    #[test]
    fn test_two_class_scenario_is_differentiable() {
        let device = Default::default();
        let normal = Distribution::Normal(0.0, 1.0);
        let x = Tensor::<TestAutodiffBackend, 2>::random([2, 4], normal, &device).require_grad();
        let q = Tensor::<TestAutodiffBackend, 2>::random([5, 4], normal, &device);

        let loss = supervised_contrastive_loss(
            x.clone(),
            labels(&[0, 1]),
            q,
            labels(&[0, 0, 0, 1, 1]),
            1.0,
        );
        let value: f32 = loss.clone().into_scalar().elem();
        assert!(value.is_finite(), "loss should be finite, got {value}");
        assert!(value >= 0.0, "loss should be non-negative, got {value}");

        let grads = loss.backward();
        let grad = x.grad(&grads).expect("batch embeddings should have gradient");
        let grad_rows: Vec<f32> = grad.into_data().to_vec().unwrap();
        // Class-0 row has zero weight, class-1 row must receive gradient
        assert!(grad_rows[..4].iter().all(|g| g.abs() < 1e-7));
        assert!(grad_rows[4..].iter().any(|g| g.abs() > 0.0));
    }

    #[test]
    fn test_lower_temperature_sharpens() {
        // Matching direction dominates more at low temperature → lower loss.
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::from([[1.0_f32, 0.0]]), &device);
        let q = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0_f32, 0.0], [-1.0, 0.0]]),
            &device,
        );
        let loss_at = |t: f64| -> f32 {
            supervised_contrastive_loss(x.clone(), labels(&[1]), q.clone(), labels(&[1, 0]), t)
                .into_scalar()
                .elem()
        };
        assert!(loss_at(0.1) < loss_at(1.0));
    }
}
