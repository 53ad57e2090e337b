// ============================================================
// Ascent Controller
// ============================================================
// Runs the K perturb-evaluate-update steps for one batch:
//
//   e      = wte(input_ids)                       constant
//   ref    = f(e)                                 detached
//   δ_0    = DeltaInitializer
//   for k in 0..K:
//       L_k = CE(f(e + δ_k), y) + smooth · MSE(f(e + δ_k), ref)
//       backprop L_k / (accum · K) into the LoRA parameters
//       if k == K-1: stop
//       g   = ∇δ MSE(f̂(e + δ_k), ref̂)         on a dropout-free copy
//       H·1 ≈ central difference of g          Newton regime only
//       δ_{k+1} = policy(δ_k, g, H·1)
//
// δ lives on the inner (non-autodiff) backend between steps and is
// re-wrapped as a fresh leaf for each forward pass, so every step
// starts from a constant.
//
// The curvature probe replaces a second backward pass: along the
// unit direction u = 1/‖1‖,
//     H·1 ≈ ‖1‖ · (g(δ + h·u) - g(δ - h·u)) / 2h
//
// Reference: Zhu et al. (2020) FreeLB, Burn Book §5 (Autodiff)

use burn::{
    module::AutodiffModule,
    optim::{GradientsAccumulator, GradientsParams},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::{
    data::batcher::LmBatch,
    domain::{
        accounting::LossScale,
        adversarial::{AdversarialSettings, UpdateRegime},
    },
    error::{Stage, TrainError},
    ml::{
        adversarial::{delta::DeltaInitializer, policy::policy_for, projection::per_sample_l2},
        loss::{causal_lm_loss, smoothing_loss},
        model::LanguageModel,
    },
};

/// Finite-difference step of the curvature probe.
pub const CURVATURE_PROBE_STEP: f64 = 1e-3;

/// What happened during one batch's ascent loop.
#[derive(Debug, Clone, Default)]
pub struct AscentReport {
    /// Scaled loss of every ascent step, in order
    pub step_losses:    Vec<f64>,
    /// Per-sample L2 norm of the delta each step's forward pass used
    pub delta_norms:    Vec<Vec<f32>>,
    pub delta_updates:  usize,
    pub newton_updates: usize,
}

impl AscentReport {
    /// Sum of the scaled step losses; this is what the running
    /// training loss accumulates.
    pub fn scaled_loss(&self) -> f64 {
        self.step_losses.iter().sum()
    }
}

pub struct AscentController {
    settings:    AdversarialSettings,
    scale:       LossScale,
    initializer: DeltaInitializer,
}

impl AscentController {
    pub fn new(settings: AdversarialSettings, accumulation_steps: usize, seed: u64) -> Self {
        let scale       = LossScale::new(accumulation_steps, settings.steps);
        let initializer = DeltaInitializer::new(settings.init_mag, settings.norm, seed);
        Self { settings, scale, initializer }
    }

    /// Run all ascent steps of one batch, adding every step's
    /// parameter gradients to `accumulator`.
    pub fn run<B, M>(
        &mut self,
        model:       &M,
        batch:       &LmBatch<B>,
        regime:      UpdateRegime,
        accumulator: &mut GradientsAccumulator<M>,
    ) -> Result<AscentReport, TrainError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + LanguageModel<B>,
    {
        let steps  = self.settings.steps.max(1);
        let policy = policy_for::<B::InnerBackend>(&self.settings, regime);
        let mask   = batch.attention_mask.clone();

        // the token table is frozen, so the base embeddings are constant
        let embeds    = model.embed(batch.input_ids.clone()).detach();
        // taken through the training model so the reference sees the
        // same dropout as the perturbed passes; the graph is discarded
        let reference = model.forward_embeds(embeds.clone(), mask.clone()).detach();

        let device    = embeds.device();
        let mut delta = self
            .initializer
            .init::<B>(embeds.dims(), mask.clone(), &device)
            .inner();

        let probe = (steps > 1).then(|| SmoothingProbe::new(model, embeds.clone(), mask.clone()));
        let mut report = AscentReport::default();

        for astep in 0..steps {
            report.delta_norms.push(checked_norms(delta.clone())?);

            // [1] Forward on the perturbed embeddings
            let leaf   = Tensor::<B, 3>::from_inner(delta.clone()).require_grad();
            let logits = model.forward_embeds(embeds.clone() + leaf, mask.clone());
            let task   = causal_lm_loss(logits.clone(), batch.labels.clone());
            let smooth = smoothing_loss(logits, reference.clone());
            let scaled = (task + smooth.mul_scalar(self.settings.smooth)).mul_scalar(self.scale.factor());

            let value = scaled.clone().into_scalar().elem::<f64>();
            report
                .step_losses
                .push(TrainError::check_finite(Stage::Forward, "adversarial loss", value)?);

            // [2] Backward into the adapter parameters
            let grads = scaled.backward();
            accumulator.accumulate(model, GradientsParams::from_grads(grads, model));

            if astep + 1 == steps {
                break;
            }
            let Some(probe) = probe.as_ref() else { break };

            // [3] Next delta
            let grad      = probe.smoothing_grad(delta.clone())?;
            let curvature = if policy.needs_curvature() {
                Some(probe.curvature(delta.clone())?)
            } else {
                None
            };
            delta = policy.update(delta, grad, curvature)?;

            report.delta_updates += 1;
            if policy.regime() == UpdateRegime::Newton {
                report.newton_updates += 1;
            }
        }

        tracing::debug!(
            "ascent: {} steps, {} delta updates ({} newton), loss {:.6}",
            report.step_losses.len(),
            report.delta_updates,
            report.newton_updates,
            report.scaled_loss()
        );
        Ok(report)
    }
}

/// Per-sample delta norms on the host, rejecting NaN/Inf.
fn checked_norms<B: Backend>(delta: Tensor<B, 3>) -> Result<Vec<f32>, TrainError> {
    let norms: Vec<f32> = per_sample_l2(delta)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor { stage: Stage::Ascent, reason: format!("{e:?}") })?;

    for &norm in &norms {
        TrainError::check_finite(Stage::Ascent, "delta norm", norm as f64)?;
    }
    Ok(norms)
}

// ─── Smoothing-loss probe ─────────────────────────────────────────────────────
/// Dropout-free, parameter-frozen copy of the model used to take
/// gradients of the smoothing loss with respect to delta alone.
struct SmoothingProbe<B: AutodiffBackend, M> {
    model:     M,
    embeds:    Tensor<B, 3>,
    mask:      Tensor<B, 2, Int>,
    reference: Tensor<B, 3>,
}

impl<B, M> SmoothingProbe<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LanguageModel<B>,
{
    fn new(model: &M, embeds: Tensor<B, 3>, mask: Tensor<B, 2, Int>) -> Self {
        let model     = model.without_dropout().no_grad();
        let reference = model.forward_embeds(embeds.clone(), mask.clone()).detach();
        Self { model, embeds, mask, reference }
    }

    /// ∇δ MSE(f(e + δ), f(e))
    fn smoothing_grad(
        &self,
        delta: Tensor<B::InnerBackend, 3>,
    ) -> Result<Tensor<B::InnerBackend, 3>, TrainError> {
        let leaf   = Tensor::<B, 3>::from_inner(delta).require_grad();
        let logits = self
            .model
            .forward_embeds(self.embeds.clone() + leaf.clone(), self.mask.clone());
        let grads  = smoothing_loss(logits, self.reference.clone()).backward();

        leaf.grad(&grads).ok_or_else(|| TrainError::Tensor {
            stage:  Stage::Ascent,
            reason: "smoothing loss does not depend on delta".into(),
        })
    }

    /// H·1 by a central difference of the smoothing gradient.
    fn curvature(
        &self,
        delta: Tensor<B::InnerBackend, 3>,
    ) -> Result<Tensor<B::InnerBackend, 3>, TrainError> {
        let [_, seq, hidden] = delta.dims();
        let ones_norm = ((seq * hidden) as f64).sqrt();
        let offset    = delta.ones_like().mul_scalar(CURVATURE_PROBE_STEP / ones_norm);

        let plus  = self.smoothing_grad(delta.clone() + offset.clone())?;
        let minus = self.smoothing_grad(delta - offset)?;
        Ok((plus - minus).mul_scalar(ones_norm / (2.0 * CURVATURE_PROBE_STEP)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataloader::batcher::Batcher;

    use crate::{
        data::{batcher::LmBatcher, collator::{tests::ByteCodec, CausalLmCollator}},
        domain::record::PromptResponse,
        ml::model::{tests::{tiny_config, AB}, LoraCausalLm},
    };

    fn synthetic_batch() -> LmBatch<AB> {
        let collator = CausalLmCollator::new(8);
        let samples  = collator
            .collate_all(
                &[PromptResponse::new("ab", "cd"), PromptResponse::new("hello", "x")],
                &ByteCodec,
            )
            .unwrap();
        LmBatcher::<AB>::new(Default::default()).batch(samples)
    }

    fn settings(steps: usize, init_mag: f64, max_norm: f64) -> AdversarialSettings {
        AdversarialSettings { steps, init_mag, lr: 1.0, max_norm, ..Default::default() }
    }

    #[test]
    fn test_single_step_never_updates_delta() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut controller  = AscentController::new(settings(1, 1.0, 0.5), 1, 0);
        let mut accumulator = GradientsAccumulator::new();

        let report = controller
            .run(&model, &synthetic_batch(), UpdateRegime::GradientAscent, &mut accumulator)
            .unwrap();

        assert_eq!(report.step_losses.len(), 1);
        assert_eq!(report.delta_updates, 0);
        assert!(!accumulator.grads().is_empty());
    }

    #[test]
    fn test_second_step_delta_is_inside_the_ball() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut controller  = AscentController::new(settings(2, 1.0, 0.5), 1, 42);
        let mut accumulator = GradientsAccumulator::new();

        let report = controller
            .run(&model, &synthetic_batch(), UpdateRegime::GradientAscent, &mut accumulator)
            .unwrap();

        assert_eq!(report.delta_updates, 1);
        assert_eq!(report.delta_norms.len(), 2);
        for norm in &report.delta_norms[1] {
            assert!(*norm <= 0.5 + 1e-5, "delta norm {norm} escaped the ball");
        }
    }

    #[test]
    fn test_zero_magnitude_keeps_delta_zero_across_steps() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut controller  = AscentController::new(settings(3, 0.0, 0.5), 1, 5);
        let mut accumulator = GradientsAccumulator::new();

        let report = controller
            .run(&model, &synthetic_batch(), UpdateRegime::GradientAscent, &mut accumulator)
            .unwrap();

        assert_eq!(report.delta_norms.len(), 3);
        assert!(report.delta_norms.iter().flatten().all(|&n| n == 0.0));
    }

    #[test]
    fn test_step_losses_are_scaled_by_window_and_steps() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let batch = synthetic_batch();

        let mut plain = AscentController::new(settings(1, 0.0, 0.0), 1, 0);
        let unscaled  = plain
            .run(&model, &batch, UpdateRegime::GradientAscent, &mut GradientsAccumulator::new())
            .unwrap()
            .scaled_loss();

        let mut windowed = AscentController::new(settings(1, 0.0, 0.0), 4, 0);
        let scaled = windowed
            .run(&model, &batch, UpdateRegime::GradientAscent, &mut GradientsAccumulator::new())
            .unwrap()
            .scaled_loss();

        assert!((scaled * 4.0 - unscaled).abs() < 1e-6);
    }

    #[test]
    fn test_newton_regime_updates_delta_inside_the_ball() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        for seed in 0..3 {
            let mut controller  = AscentController::new(settings(2, 1.0, 0.5), 1, seed);
            let mut accumulator = GradientsAccumulator::new();

            let report = controller
                .run(&model, &synthetic_batch(), UpdateRegime::Newton, &mut accumulator)
                .unwrap();

            assert_eq!(report.delta_updates, 1);
            assert_eq!(report.newton_updates, 1);
            for norm in &report.delta_norms[1] {
                assert!(*norm <= 0.5 + 1e-5, "seed {seed}: newton delta norm {norm} escaped the ball");
            }
        }
    }

    #[test]
    fn test_newton_regime_keeps_zero_delta_at_zero() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut controller  = AscentController::new(settings(2, 0.0, 0.5), 1, 3);
        let mut accumulator = GradientsAccumulator::new();

        let report = controller
            .run(&model, &synthetic_batch(), UpdateRegime::Newton, &mut accumulator)
            .unwrap();

        assert_eq!(report.newton_updates, 1);
        assert!(report.delta_norms.iter().flatten().all(|&n| n == 0.0));
    }
}
