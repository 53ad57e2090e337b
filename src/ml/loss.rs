// ============================================================
// Layer 5 - Loss Functions
// ============================================================
// Task loss:      shifted causal cross-entropy. Logits at t are
//                 scored against the label at t+1; positions
//                 whose label is IGNORE_INDEX are left out of
//                 both the sum and the count.
// Smoothing loss: MSE between perturbed and reference logits.
//
// Reference: Burn Book §5, Zhu et al. (2020) FreeLB

use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
    tensor::activation::log_softmax,
};

/// Mean negative log-likelihood of the next token.
///
/// logits: [batch, seq, vocab], labels: [batch, seq] → [1]
pub fn causal_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch, seq, vocab] = logits.dims();

    let logits  = logits.slice([0..batch, 0..seq - 1, 0..vocab]);
    let targets = labels.slice([0..batch, 1..seq]);

    let keep = targets.clone().greater_equal_elem(0).float();
    // ignored targets point at id 0; their term is masked out below
    let index = targets.clamp_min(0).unsqueeze_dim::<3>(2);

    let picked = log_softmax(logits, 2)
        .gather(2, index)
        .squeeze::<2>(2);

    let count = keep.clone().sum().clamp_min(1.0);
    (picked * keep).sum().neg() / count
}

/// Consistency penalty between perturbed and clean logits.
/// `reference` must already be detached.
pub fn smoothing_loss<B: Backend>(perturbed: Tensor<B, 3>, reference: Tensor<B, 3>) -> Tensor<B, 1> {
    MseLoss::new().forward(perturbed, reference, Reduction::Mean)
}
