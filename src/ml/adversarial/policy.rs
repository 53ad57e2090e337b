// ============================================================
// Delta Update Policies
// ============================================================
// One ascent step turns (delta, ∇δ L_smooth) into the next delta.
//
//   GradientAscent:  δ ← Π(δ + lr · g / ‖g‖)
//   NewtonStep:      δ ← Π(δ + lr · P ⊙ g / ‖g‖),  P = (H Hᵀ)⁻¹ H
//
// Π is the per-sample L2 ball projection in both regimes. A policy
// declares whether it needs the curvature probe, so the cheaper
// regime never pays for the extra passes.

use burn::prelude::*;

use crate::{
    domain::adversarial::{AdversarialSettings, UpdateRegime},
    error::{Stage, TrainError},
    ml::adversarial::{
        newton::gram_preconditioner,
        projection::{normalise_per_sample, project_l2_ball},
    },
};

pub trait DeltaUpdatePolicy<B: Backend> {
    fn regime(&self) -> UpdateRegime;

    /// Whether `update` must be given the curvature probe H.
    fn needs_curvature(&self) -> bool;

    fn update(
        &self,
        delta:     Tensor<B, 3>,
        grad:      Tensor<B, 3>,
        curvature: Option<Tensor<B, 3>>,
    ) -> Result<Tensor<B, 3>, TrainError>;
}

// ─── Gradient ascent ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy)]
pub struct GradientAscent {
    pub lr:       f64,
    pub max_norm: f64,
}

impl<B: Backend> DeltaUpdatePolicy<B> for GradientAscent {
    fn regime(&self) -> UpdateRegime {
        UpdateRegime::GradientAscent
    }

    fn needs_curvature(&self) -> bool {
        false
    }

    fn update(
        &self,
        delta:      Tensor<B, 3>,
        grad:       Tensor<B, 3>,
        _curvature: Option<Tensor<B, 3>>,
    ) -> Result<Tensor<B, 3>, TrainError> {
        let stepped = delta + normalise_per_sample(grad).mul_scalar(self.lr);
        Ok(project_l2_ball(stepped, self.max_norm))
    }
}

// ─── Newton step ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy)]
pub struct NewtonStep {
    pub lr:       f64,
    pub max_norm: f64,
}

impl<B: Backend> DeltaUpdatePolicy<B> for NewtonStep {
    fn regime(&self) -> UpdateRegime {
        UpdateRegime::Newton
    }

    fn needs_curvature(&self) -> bool {
        true
    }

    fn update(
        &self,
        delta:     Tensor<B, 3>,
        grad:      Tensor<B, 3>,
        curvature: Option<Tensor<B, 3>>,
    ) -> Result<Tensor<B, 3>, TrainError> {
        let curvature = curvature.ok_or_else(|| TrainError::Tensor {
            stage:  Stage::HessianInversion,
            reason: "newton step called without a curvature probe".into(),
        })?;
        let preconditioner = gram_preconditioner(curvature)?;

        let step    = preconditioner * normalise_per_sample(grad);
        let stepped = delta + step.mul_scalar(self.lr);
        Ok(project_l2_ball(stepped, self.max_norm))
    }
}

pub fn policy_for<B: Backend>(
    settings: &AdversarialSettings,
    regime:   UpdateRegime,
) -> Box<dyn DeltaUpdatePolicy<B>> {
    match regime {
        UpdateRegime::GradientAscent => Box::new(GradientAscent {
            lr:       settings.lr,
            max_norm: settings.max_norm,
        }),
        UpdateRegime::Newton => Box::new(NewtonStep {
            lr:       settings.lr,
            max_norm: settings.max_norm,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::ml::adversarial::projection::per_sample_l2;

    type TB = NdArray;

    fn to_vec(t: Tensor<TB, 3>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec().unwrap()
    }

    #[test]
    fn test_ascent_moves_lr_along_unit_gradient() {
        let device = Default::default();
        let policy = GradientAscent { lr: 0.1, max_norm: 0.0 };
        let delta  = Tensor::<TB, 3>::zeros([1, 1, 2], &device);
        let grad   = Tensor::<TB, 3>::from_floats([[[30.0, 40.0]]], &device);

        let out = to_vec(DeltaUpdatePolicy::<TB>::update(&policy, delta, grad, None).unwrap());
        assert!((out[0] - 0.06).abs() < 1e-6 && (out[1] - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_ascent_result_is_projected() {
        let device = Default::default();
        let policy = GradientAscent { lr: 10.0, max_norm: 0.5 };
        let delta  = Tensor::<TB, 3>::zeros([2, 2, 2], &device);
        let grad   = Tensor::<TB, 3>::ones([2, 2, 2], &device);

        let out   = DeltaUpdatePolicy::<TB>::update(&policy, delta, grad, None).unwrap();
        let norms: Vec<f32> = per_sample_l2(out).into_data().convert::<f32>().to_vec().unwrap();
        assert!(norms.iter().all(|n| (n - 0.5).abs() < 1e-5), "{norms:?}");
    }

    #[test]
    fn test_newton_with_orthonormal_curvature_masks_the_step() {
        let device = Default::default();
        let policy = NewtonStep { lr: 1.0, max_norm: 0.0 };
        let delta  = Tensor::<TB, 3>::zeros([1, 2, 3], &device);
        let grad   = Tensor::<TB, 3>::ones([1, 2, 3], &device);
        // P = H, so only the diagonal entries survive the elementwise product
        let h = Tensor::<TB, 3>::from_floats([[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]], &device);

        let out = to_vec(DeltaUpdatePolicy::<TB>::update(&policy, delta, grad, Some(h)).unwrap());
        let unit = 1.0 / 6.0f32.sqrt();
        let expected = [unit, 0.0, 0.0, 0.0, unit, 0.0];
        for (a, b) in out.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{out:?}");
        }
    }

    #[test]
    fn test_newton_without_curvature_is_an_error() {
        let device = Default::default();
        let policy = NewtonStep { lr: 1.0, max_norm: 0.0 };
        let delta  = Tensor::<TB, 3>::zeros([1, 2, 3], &device);
        let grad   = Tensor::<TB, 3>::ones([1, 2, 3], &device);
        assert!(DeltaUpdatePolicy::<TB>::update(&policy, delta, grad, None).is_err());
    }

    #[test]
    fn test_policy_for_matches_regime() {
        let settings = AdversarialSettings::default();
        let ascent = policy_for::<TB>(&settings, UpdateRegime::GradientAscent);
        let newton = policy_for::<TB>(&settings, UpdateRegime::Newton);
        assert!(!ascent.needs_curvature());
        assert!(newton.needs_curvature());
        assert_eq!(newton.regime(), UpdateRegime::Newton);
    }
}
