use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::domain::record::IGNORE_INDEX;

/// One tokenised, padded causal-LM sample.
/// Layout: prompt ++ response ++ [EOS] ++ [PAD]...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmSample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels:         Vec<i64>,
}

impl LmSample {
    /// Number of positions that contribute to the loss.
    pub fn label_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }

    /// Label ids with ignored positions removed.
    pub fn label_ids(&self) -> Vec<u32> {
        self.labels
            .iter()
            .filter(|&&l| l != IGNORE_INDEX)
            .map(|&l| l as u32)
            .collect()
    }
}

pub struct LmDataset {
    samples: Vec<LmSample>,
}

impl LmDataset {
    pub fn new(samples: Vec<LmSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Number of batches one pass produces (the last may be short).
    pub fn batch_count(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }
}

impl Dataset<LmSample> for LmDataset {
    fn get(&self, index: usize) -> Option<LmSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
