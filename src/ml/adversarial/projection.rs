// ─── Per-sample L2 geometry ───────────────────────────────────────────────────
// Every sample in a batch owns its own delta; norms and the ball
// projection are computed per sample over the flattened
// [seq, hidden] block.

use burn::prelude::*;

/// Smallest denominator used when dividing by a norm.
pub const NORM_FLOOR: f64 = 1e-12;
/// Smallest gradient norm a step is normalised by.
pub const GRAD_NORM_FLOOR: f64 = 1e-8;

/// [batch, seq, hidden] → [batch]
pub fn per_sample_l2<B: Backend>(tensor: Tensor<B, 3>) -> Tensor<B, 1> {
    let [batch, seq, hidden] = tensor.dims();
    tensor
        .reshape([batch, seq * hidden])
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .reshape([batch])
}

/// Scale every sample whose norm exceeds `max_norm` back onto the
/// ball surface; samples inside the ball are untouched. A
/// non-positive `max_norm` means no bound.
pub fn project_l2_ball<B: Backend>(delta: Tensor<B, 3>, max_norm: f64) -> Tensor<B, 3> {
    if max_norm <= 0.0 {
        return delta;
    }
    let batch = delta.dims()[0];
    let norms = per_sample_l2(delta.clone());

    let outside = norms.clone().greater_elem(max_norm).float();
    let shrink  = norms.clamp_min(NORM_FLOOR).recip().mul_scalar(max_norm);
    let factor  = shrink * outside.clone() + outside.neg().add_scalar(1.0);

    delta * factor.reshape([batch, 1, 1])
}

/// g / max(||g||, GRAD_NORM_FLOOR) per sample.
pub fn normalise_per_sample<B: Backend>(grad: Tensor<B, 3>) -> Tensor<B, 3> {
    let batch = grad.dims()[0];
    let norms = per_sample_l2(grad.clone()).clamp_min(GRAD_NORM_FLOOR);
    grad / norms.reshape([batch, 1, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn norms(t: Tensor<TB, 3>) -> Vec<f32> {
        per_sample_l2(t).into_data().convert::<f32>().to_vec().unwrap()
    }

    #[test]
    fn test_projection_lands_on_the_ball() {
        let device = Default::default();
        // sample 0 has norm 5, sample 1 has norm 0.3
        let delta = Tensor::<TB, 3>::from_floats(
            [[[3.0, 4.0], [0.0, 0.0]], [[0.0, 0.3], [0.0, 0.0]]],
            &device,
        );
        let projected = norms(project_l2_ball(delta, 0.5));
        assert!((projected[0] - 0.5).abs() < 1e-6);
        assert!((projected[1] - 0.3).abs() < 1e-6, "inside the ball must be unchanged");
    }

    #[test]
    fn test_projection_keeps_direction() {
        let device = Default::default();
        let delta = Tensor::<TB, 3>::from_floats([[[3.0, 4.0]]], &device);
        let out: Vec<f32> = project_l2_ball(delta, 1.0).into_data().convert::<f32>().to_vec().unwrap();
        assert!((out[0] - 0.6).abs() < 1e-6 && (out[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_max_norm_is_unbounded() {
        let device = Default::default();
        let delta = Tensor::<TB, 3>::from_floats([[[30.0, 40.0]]], &device);
        assert!((norms(project_l2_ball(delta, 0.0))[0] - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_gradient_normalises_to_zero() {
        let device = Default::default();
        let grad = Tensor::<TB, 3>::zeros([2, 3, 4], &device);
        assert_eq!(norms(normalise_per_sample(grad)), vec![0.0, 0.0]);
    }

    #[test]
    fn test_normalised_gradient_has_unit_norm() {
        let device = Default::default();
        let grad = Tensor::<TB, 3>::from_floats([[[0.0, 2.0], [0.0, 0.0]], [[1.0, 1.0], [1.0, 1.0]]], &device);
        for n in norms(normalise_per_sample(grad)) {
            assert!((n - 1.0).abs() < 1e-6);
        }
    }
}
