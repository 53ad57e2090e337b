// ============================================================
// Layer 4 - Causal LM Collator
// ============================================================
// Turns a PromptResponse into fixed-length token sequences.
//
//   input_ids:      prompt ++ response ++ [EOS] ++ [PAD]...
//   attention_mask: 1 over real tokens, 0 over padding
//   labels:         IGNORE_INDEX over prompt and padding,
//                   the token id over response and EOS
//
// Sequences longer than max_length are cut from the end, so the
// prompt is kept and the response loses its tail first. Labels
// are NOT shifted here: the loss shifts them by one position so
// that logits at t predict the token at t+1.
//
// Reference: Radford et al. (2019) GPT-2, HuggingFace collators

use anyhow::Result;

use crate::data::dataset::LmSample;
use crate::domain::{
    record::{PromptResponse, IGNORE_INDEX},
    traits::TextCodec,
};

pub struct CausalLmCollator {
    max_length: usize,
}

impl CausalLmCollator {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn collate<C: TextCodec + ?Sized>(
        &self,
        record: &PromptResponse,
        codec:  &C,
    ) -> Result<LmSample> {
        let prompt_ids   = codec.encode(&record.prompt)?;
        let mut response = codec.encode(&record.response)?;
        response.push(codec.eos_id());

        let mut input_ids: Vec<u32> = Vec::with_capacity(self.max_length);
        let mut labels:    Vec<i64> = Vec::with_capacity(self.max_length);

        input_ids.extend_from_slice(&prompt_ids);
        labels.extend(std::iter::repeat(IGNORE_INDEX).take(prompt_ids.len()));
        input_ids.extend_from_slice(&response);
        labels.extend(response.iter().map(|&id| id as i64));

        input_ids.truncate(self.max_length);
        labels.truncate(self.max_length);

        let real = input_ids.len();
        let mut attention_mask = vec![1u32; real];

        input_ids.resize(self.max_length, codec.pad_id());
        labels.resize(self.max_length, IGNORE_INDEX);
        attention_mask.resize(self.max_length, 0);

        Ok(LmSample { input_ids, attention_mask, labels })
    }

    /// Collate every record, logging how many lost all their labels
    /// to truncation (those still run but add no task loss).
    pub fn collate_all<C: TextCodec + ?Sized>(
        &self,
        records: &[PromptResponse],
        codec:   &C,
    ) -> Result<Vec<LmSample>> {
        let samples = records
            .iter()
            .map(|r| self.collate(r, codec))
            .collect::<Result<Vec<_>>>()?;

        let unlabeled = samples.iter().filter(|s| s.label_count() == 0).count();
        if unlabeled > 0 {
            tracing::warn!(
                "{} of {} samples have no response tokens left after truncation to {}",
                unlabeled,
                samples.len(),
                self.max_length
            );
        }
        Ok(samples)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Byte-level test codec: every byte maps into ids 2..30,
    /// 0 is padding and 1 is end-of-sequence.
    pub(crate) struct ByteCodec;

    impl TextCodec for ByteCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.bytes().map(|b| (b % 28) as u32 + 2).collect())
        }
        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids
                .iter()
                .filter(|&&id| id >= 2)
                .map(|&id| char::from(b'a' + ((id - 2) % 26) as u8))
                .collect())
        }
        fn pad_id(&self) -> u32 { 0 }
        fn eos_id(&self) -> u32 { 1 }
        fn vocab_size(&self) -> usize { 32 }
    }

    #[test]
    fn test_labels_ignore_prompt_and_padding() {
        let collator = CausalLmCollator::new(8);
        let sample   = collator
            .collate(&PromptResponse::new("ab", "c"), &ByteCodec)
            .unwrap();

        assert_eq!(sample.input_ids.len(), 8);
        assert_eq!(sample.attention_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(sample.labels[0], IGNORE_INDEX);
        assert_eq!(sample.labels[1], IGNORE_INDEX);
        assert_eq!(sample.labels[2], sample.input_ids[2] as i64);
        assert_eq!(sample.labels[3], 1); // eos
        assert!(sample.labels[4..].iter().all(|&l| l == IGNORE_INDEX));
        assert!(sample.input_ids[4..].iter().all(|&id| id == 0));
    }

    #[test]
    fn test_truncation_keeps_prompt() {
        let collator = CausalLmCollator::new(4);
        let sample   = collator
            .collate(&PromptResponse::new("abc", "defg"), &ByteCodec)
            .unwrap();
        assert_eq!(sample.attention_mask, vec![1, 1, 1, 1]);
        assert_eq!(sample.label_count(), 1);
    }

    #[test]
    fn test_prompt_filling_window_leaves_no_labels() {
        let collator = CausalLmCollator::new(3);
        let samples  = collator
            .collate_all(&[PromptResponse::new("abcd", "e")], &ByteCodec)
            .unwrap();
        assert_eq!(samples[0].label_count(), 0);
    }
}
