// ─── Global gradient-norm clipping ────────────────────────────────────────────
// Burn's optimizers clip per parameter; the accumulated adapter
// gradients are clipped as one vector instead:
//
//   n = sqrt(Σ ‖g_p‖²)
//   if n > max: g_p ← g_p · max / (n + 1e-6)
//
// Two visitor passes over the module: one sums squared norms,
// one rescales the registered gradients in place.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

struct SquaredNorm<'a, B: AutodiffBackend> {
    grads:   &'a GradientsParams,
    sum:     f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sum += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct Rescale<'a, B: AutodiffBackend> {
    grads:   &'a mut GradientsParams,
    factor:  f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

/// Global L2 norm of all gradients registered for `module`.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = SquaredNorm::<B> { grads, sum: 0.0, backend: PhantomData };
    module.visit(&mut visitor);
    visitor.sum.sqrt()
}

/// Clip in place and return the norm measured before clipping.
/// `max_norm <= 0` disables clipping.
pub fn clip_global_norm<B, M>(module: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_grad_norm::<B, M>(module, grads);
    if max_norm > 0.0 && norm > max_norm {
        let factor = max_norm / (norm + 1e-6);
        let mut visitor = Rescale::<B> { grads, factor, backend: PhantomData };
        module.visit(&mut visitor);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ml::model::{tests::{tiny_config, AB}, LanguageModel, LoraCausalLm};

    fn adapter_grads(model: &LoraCausalLm<AB>) -> GradientsParams {
        let device = Default::default();
        let ids    = Tensor::<AB, 2, Int>::from_ints([[1, 2, 3, 4]], &device);
        let mask   = Tensor::<AB, 2, Int>::ones([1, 4], &device);
        let grads  = model.forward(ids, mask).powf_scalar(2.0).sum().backward();
        GradientsParams::from_grads(grads, model)
    }

    #[test]
    fn test_clipping_brings_norm_to_max() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut grads = adapter_grads(&model);

        let before = clip_global_norm(&model, &mut grads, 1e-3);
        assert!(before > 1e-3, "test needs a gradient larger than the bound, got {before}");

        let after = global_grad_norm(&model, &grads);
        assert!((after - 1e-3).abs() < 1e-5, "clipped norm {after}");
    }

    #[test]
    fn test_small_gradients_are_left_alone() {
        let model: LoraCausalLm<AB> = tiny_config().init(&Default::default());
        let mut grads = adapter_grads(&model);

        let before = clip_global_norm(&model, &mut grads, f64::MAX);
        let after  = global_grad_norm(&model, &grads);
        assert!((before - after).abs() < 1e-9);
    }
}
