// ============================================================
// Layer 4 - Causal LM Batcher
// ============================================================
// Implements Burn's Batcher trait: stacks N pre-padded LmSamples
// into [N, seq_len] Int tensors on the target device.
//
// Samples are already padded to max_length by the collator, so
// batching is a flatten + reshape:
//   [s1_t1 .. s1_tS, s2_t1 .. sN_tS] -> [N, S]
//
// Host copies of the input ids and the non-ignored labels ride
// along so the evaluator can decode text without reading tensors
// back from the device.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::LmSample;

#[derive(Debug, Clone)]
pub struct LmBatch<B: Backend> {
    /// Token ids - shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding - shape: [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Target ids with IGNORE_INDEX at excluded positions
    /// shape: [batch_size, seq_len]
    pub labels: Tensor<B, 2, Int>,

    /// Host copy of input ids, one row per sample
    pub input_rows: Vec<Vec<u32>>,

    /// Host copy of the labels that count towards the loss
    pub label_rows: Vec<Vec<u32>>,
}

impl<B: Backend> LmBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }
}

#[derive(Clone, Debug)]
pub struct LmBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> LmBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<LmSample, LmBatch<B>> for LmBatcher<B> {
    fn batch(&self, items: Vec<LmSample>) -> LmBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();

        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().map(|&x| x as i32))
            .collect();

        let label_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.labels.iter().map(|&x| x as i32))
            .collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(
            input_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1, Int>::from_ints(
            mask_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let labels = Tensor::<B, 1, Int>::from_ints(
            label_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        LmBatch {
            input_ids,
            attention_mask,
            labels,
            input_rows: items.iter().map(|s| s.input_ids.clone()).collect(),
            label_rows: items.iter().map(|s| s.label_ids()).collect(),
        }
    }
}
