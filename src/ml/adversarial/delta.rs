// ============================================================
// Delta Initializer
// ============================================================
// delta_0 = N(0, 1) * mask * eps / sqrt(len * hidden)
//
// `len` is the number of real tokens in the sample, so the
// expected initial L2 norm is about eps whatever the sequence
// length. Padded positions get exactly zero.
//
// The generator is owned here and seeded from the run config,
// so two trainers in one process never share random state.

use burn::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::domain::adversarial::PerturbationNorm;

pub struct DeltaInitializer {
    init_mag: f64,
    norm:     PerturbationNorm,
    rng:      StdRng,
}

impl DeltaInitializer {
    pub fn new(init_mag: f64, norm: PerturbationNorm, seed: u64) -> Self {
        Self { init_mag, norm, rng: StdRng::seed_from_u64(seed) }
    }

    /// A fresh constant delta shaped like `[batch, seq, hidden]`
    /// embeddings. Zero everywhere when `init_mag <= 0`.
    pub fn init<B: Backend>(
        &mut self,
        dims:           [usize; 3],
        attention_mask: Tensor<B, 2, Int>,
        device:         &B::Device,
    ) -> Tensor<B, 3> {
        if self.init_mag <= 0.0 {
            return Tensor::zeros(dims, device);
        }

        match self.norm {
            PerturbationNorm::L2 => self.init_l2(dims, attention_mask, device),
        }
    }

    fn init_l2<B: Backend>(
        &mut self,
        dims:           [usize; 3],
        attention_mask: Tensor<B, 2, Int>,
        device:         &B::Device,
    ) -> Tensor<B, 3> {
        let [batch, seq, hidden] = dims;

        let noise: Vec<f32> = (0..batch * seq * hidden)
            .map(|_| self.rng.sample::<f32, _>(StandardNormal))
            .collect();
        let noise = Tensor::<B, 1>::from_floats(noise.as_slice(), device).reshape(dims);

        let mask = attention_mask.float(); // [batch, seq]
        // an all-padding row keeps a finite scale; its delta is zero anyway
        let scale = mask
            .clone()
            .sum_dim(1)                    // [batch, 1]
            .clamp_min(1.0)
            .mul_scalar(hidden as f64)
            .sqrt()
            .recip()
            .mul_scalar(self.init_mag);

        noise * mask.reshape([batch, seq, 1]) * scale.reshape([batch, 1, 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::ml::adversarial::projection::per_sample_l2;

    type TB = NdArray;

    fn mask(device: &<TB as Backend>::Device) -> Tensor<TB, 2, Int> {
        Tensor::from_ints([[1, 1, 1, 0, 0, 0], [1, 1, 1, 1, 1, 1]], device)
    }

    #[test]
    fn test_padding_positions_are_zero() {
        let device = Default::default();
        let mut init = DeltaInitializer::new(1.0, PerturbationNorm::L2, 7);
        let delta = init.init::<TB>([2, 6, 4], mask(&device), &device);

        let padded: f32 = delta
            .clone()
            .slice([0..1, 3..6, 0..4])
            .abs()
            .sum()
            .into_scalar()
            .elem::<f32>();
        assert_eq!(padded, 0.0);

        let real: f32 = delta.slice([0..1, 0..3, 0..4]).abs().sum().into_scalar().elem::<f32>();
        assert!(real > 0.0);
    }

    #[test]
    fn test_zero_magnitude_gives_zero_delta() {
        let device = Default::default();
        let mut init = DeltaInitializer::new(0.0, PerturbationNorm::L2, 7);
        let delta = init.init::<TB>([2, 6, 4], mask(&device), &device);
        let total: f32 = delta.abs().sum().into_scalar().elem::<f32>();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_norm_is_close_to_magnitude_regardless_of_length() {
        let device = Default::default();
        let mut init = DeltaInitializer::new(2.0, PerturbationNorm::L2, 11);
        let mask = Tensor::<TB, 2, Int>::from_ints(
            [[1, 1, 1, 1, 0, 0, 0, 0], [1, 1, 1, 1, 1, 1, 1, 1]],
            &device,
        );
        let delta = init.init::<TB>([2, 8, 256], mask, &device);
        let norms: Vec<f32> = per_sample_l2(delta).into_data().convert::<f32>().to_vec().unwrap();

        for norm in norms {
            assert!((norm - 2.0).abs() < 0.25, "initial norm {norm} far from eps");
        }
    }

    #[test]
    fn test_same_seed_same_delta() {
        let device = Default::default();
        let a = DeltaInitializer::new(1.0, PerturbationNorm::L2, 3).init::<TB>([2, 6, 4], mask(&device), &device);
        let b = DeltaInitializer::new(1.0, PerturbationNorm::L2, 3).init::<TB>([2, 6, 4], mask(&device), &device);
        let diff: f32 = (a - b).abs().max().into_scalar().elem::<f32>();
        assert_eq!(diff, 0.0);
    }
}
