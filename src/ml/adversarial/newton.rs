// ============================================================
// Newton Preconditioner
// ============================================================
// For each sample the curvature probe H = ∇²L_smooth · 1 is a
// [seq, hidden] matrix. The preconditioner is
//
//     G = H Hᵀ            (seq × seq)
//     P = G⁻¹ H           (seq × hidden)
//
// G is inverted on the host in f64 with nalgebra. A singular G,
// or one whose condition estimate ‖G‖_F ‖G⁻¹‖_F is non-finite or
// above MAX_CONDITION, is a hard error naming the sample.
//
// Reference: nalgebra docs (DMatrix::try_inverse)

use burn::prelude::*;
use nalgebra::DMatrix;

use crate::error::{Stage, TrainError};

/// Gram matrices worse conditioned than this are rejected.
pub const MAX_CONDITION: f64 = 1e12;

/// curvature: [batch, seq, hidden] → preconditioner: [batch, seq, hidden]
pub fn gram_preconditioner<B: Backend>(curvature: Tensor<B, 3>) -> Result<Tensor<B, 3>, TrainError> {
    let [batch, seq, hidden] = curvature.dims();
    let device = curvature.device();

    let values: Vec<f32> = curvature
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor {
            stage:  Stage::HessianInversion,
            reason: format!("{e:?}"),
        })?;

    let block = seq * hidden;
    let mut out: Vec<f32> = Vec::with_capacity(values.len());
    for (sample, chunk) in values.chunks(block).enumerate() {
        let h = DMatrix::<f64>::from_row_iterator(seq, hidden, chunk.iter().map(|&v| v as f64));
        let p = precondition_sample(&h, sample)?;
        // nalgebra is column-major; write back row-major
        for i in 0..seq {
            out.extend((0..hidden).map(|j| p[(i, j)] as f32));
        }
    }

    Ok(Tensor::<B, 1>::from_floats(out.as_slice(), &device).reshape([batch, seq, hidden]))
}

fn precondition_sample(h: &DMatrix<f64>, sample: usize) -> Result<DMatrix<f64>, TrainError> {
    let gram = h * h.transpose();
    let inverse = gram
        .clone()
        .try_inverse()
        .ok_or(TrainError::SingularGram { stage: Stage::HessianInversion, sample })?;

    let condition = gram.norm() * inverse.norm();
    if !condition.is_finite() || condition > MAX_CONDITION {
        return Err(TrainError::IllConditioned {
            stage: Stage::HessianInversion,
            sample,
            condition,
        });
    }
    Ok(inverse * h)
}
