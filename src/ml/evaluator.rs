// ============================================================
// Layer 5 - Evaluator
// ============================================================
// One forward pass per validation batch on the inner (no
// autodiff) backend. The embeddings get the same random initial
// delta as in training but no ascent steps are taken.
//
// Loss is scaled like training loss (divided by the accumulation
// step count). Predictions are the argmax token at every position,
// decoded next to the input and the non-ignored labels.
//
// Reference: Burn Book §5 (Validation)

use anyhow::Result;
use burn::prelude::*;

use crate::{
    data::batcher::LmBatch,
    domain::{
        accounting::LossScale,
        adversarial::AdversarialSettings,
        record::Prediction,
        traits::TextCodec,
    },
    error::{Stage, TrainError},
    ml::{adversarial::delta::DeltaInitializer, loss::causal_lm_loss, model::LanguageModel},
};

#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Sum of scaled per-batch losses
    pub loss_sum:    f64,
    pub batches:     usize,
    /// Accumulation-window count used for the final summary
    pub eval_steps:  usize,
    pub predictions: Vec<Prediction>,
}

impl EvalReport {
    /// Average scaled loss per batch; NaN for an empty loader.
    pub fn average_loss(&self) -> f64 {
        if self.batches > 0 {
            self.loss_sum / self.batches as f64
        } else {
            f64::NAN
        }
    }
}

pub struct Evaluator {
    initializer: DeltaInitializer,
    scale:       LossScale,
}

impl Evaluator {
    pub fn new(settings: &AdversarialSettings, accumulation_steps: usize, seed: u64) -> Self {
        Self {
            initializer: DeltaInitializer::new(settings.init_mag, settings.norm, seed),
            scale:       LossScale::new(accumulation_steps, 1),
        }
    }

    pub fn evaluate<B, M, I, C>(
        &mut self,
        model:       &M,
        batches:     I,
        num_batches: usize,
        codec:       &C,
    ) -> Result<EvalReport>
    where
        B: Backend,
        M: LanguageModel<B>,
        I: IntoIterator<Item = LmBatch<B>>,
        C: TextCodec + ?Sized,
    {
        let accum = self.scale.accumulation_steps;
        let mut report = EvalReport::default();

        for (step, batch) in batches.into_iter().enumerate() {
            let device = batch.input_ids.device();
            let embeds = model.embed(batch.input_ids.clone());
            let delta  = self
                .initializer
                .init::<B>(embeds.dims(), batch.attention_mask.clone(), &device);

            let logits = model.forward_embeds(embeds + delta, batch.attention_mask.clone());
            let loss   = causal_lm_loss(logits.clone(), batch.labels.clone())
                .into_scalar()
                .elem::<f64>()
                * self.scale.eval_factor();

            report.loss_sum += TrainError::check_finite(Stage::Evaluation, "validation loss", loss)?;
            report.batches  += 1;
            if (step + 1) % accum == 0 || accum > num_batches {
                report.eval_steps += 1;
            }

            report.predictions.extend(decode_batch(&batch, logits, codec)?);
        }

        Ok(report)
    }
}

fn decode_batch<B: Backend, C: TextCodec + ?Sized>(
    batch:  &LmBatch<B>,
    logits: Tensor<B, 3>,
    codec:  &C,
) -> Result<Vec<Prediction>> {
    let [rows, seq, _] = logits.dims();
    let predicted: Vec<i64> = logits
        .argmax(2)
        .reshape([rows, seq])
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| TrainError::Tensor { stage: Stage::Evaluation, reason: format!("{e:?}") })?;

    predicted
        .chunks(seq)
        .zip(batch.input_rows.iter().zip(&batch.label_rows))
        .map(|(pred, (input, label))| {
            let pred: Vec<u32> = pred.iter().map(|&id| id as u32).collect();
            Ok::<_, anyhow::Error>(Prediction {
                input:  codec.decode(input)?,
                label:  codec.decode(label)?,
                result: codec.decode(&pred)?,
            })
        })
        .collect()
}
