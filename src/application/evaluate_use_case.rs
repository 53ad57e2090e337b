// ============================================================
// Layer 2 - Evaluate Use Case
// ============================================================
// Re-runs the validation pass of a finished training run:
//
//   1. Read train_config.json, model_config.json and tokenizer.json
//      from the checkpoint directory
//   2. Load the best epoch's weights (or an explicit epoch)
//   3. Score a dataset with the same perturbed-embedding loss used
//      during training and write output_at_eval.txt
//
// No gradients are needed, so the plain backend is used.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    data::dataloader::DataLoaderBuilder,
    prelude::*,
};

use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::data::{
    batcher::LmBatcher,
    collator::CausalLmCollator,
    dataset::LmDataset,
    loader::TsvRecordLoader,
};
use crate::domain::traits::RecordSource;
use crate::infra::{
    checkpoint::CheckpointManager,
    prediction_log::PredictionLog,
    tokenizer_store::{HfCodec, TokenizerStore},
};
use crate::ml::{
    evaluator::{EvalReport, Evaluator},
    model::{CausalLmConfig, LanguageModel, LoraCausalLm},
};

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub checkpoint_path: String,
    /// Dataset to score; the run's validation file when `None`
    pub data_path:       Option<String>,
    /// Epoch to load; the best epoch when `None`
    pub epoch:           Option<usize>,
    /// Where output_at_{tag}.txt goes; the run's output_dir when `None`
    pub output_dir:      Option<String>,
    pub tag:             String,
    /// Overrides the device the run trained on
    pub device:          Option<DeviceKind>,
}

/// Result of one standalone evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    pub epoch:       usize,
    pub loss:        f64,
    pub examples:    usize,
    pub predictions: PathBuf,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluationSummary> {
        let ckpt      = CheckpointManager::open(&self.config.checkpoint_path)?;
        let train_cfg = ckpt.load_config()?;
        let model_cfg = ckpt.load_model_config()?;
        let codec     = HfCodec::new(TokenizerStore::new(ckpt.dir()).load()?)?;

        let data_path = self
            .config
            .data_path
            .clone()
            .unwrap_or_else(|| train_cfg.valid_data_path.clone());
        let records = TsvRecordLoader::new(&data_path).load_all()?;
        let dataset = LmDataset::new(CausalLmCollator::new(train_cfg.max_length).collate_all(&records, &codec)?);
        tracing::info!("Evaluating {} examples from '{}'", dataset.sample_count(), data_path);

        match self.config.device.unwrap_or(train_cfg.device) {
            DeviceKind::Gpu => self.run::<Wgpu>(&ckpt, &train_cfg, &model_cfg, &codec, dataset, WgpuDevice::default()),
            DeviceKind::Cpu => self.run::<NdArray>(&ckpt, &train_cfg, &model_cfg, &codec, dataset, NdArrayDevice::Cpu),
        }
    }

    fn run<B: Backend>(
        &self,
        ckpt:      &CheckpointManager,
        train_cfg: &TrainConfig,
        model_cfg: &CausalLmConfig,
        codec:     &HfCodec,
        dataset:   LmDataset,
        device:    B::Device,
    ) -> Result<EvaluationSummary> {
        let model: LoraCausalLm<B> = model_cfg.init(&device);
        let (model, epoch) = ckpt.load_model(model, self.config.epoch, &device)?;
        let model = model.without_dropout();

        let examples    = dataset.sample_count();
        let num_batches = dataset.batch_count(train_cfg.eval_batch_size);
        let loader      = DataLoaderBuilder::new(LmBatcher::<B>::new(device))
            .batch_size(train_cfg.eval_batch_size)
            .num_workers(1)
            .build(dataset);

        let mut evaluator = Evaluator::new(
            &train_cfg.adversarial,
            train_cfg.gradient_accumulation_steps,
            train_cfg.seed.wrapping_add(1),
        );
        let report: EvalReport = evaluator
            .evaluate(&model, loader.iter(), num_batches, codec)
            .context("evaluation aborted")?;

        let out_dir     = self.config.output_dir.clone().unwrap_or_else(|| train_cfg.output_dir.clone());
        let predictions = PredictionLog::new(out_dir)?.write(&self.config.tag, &report.predictions)?;

        Ok(EvaluationSummary { epoch, loss: report.average_loss(), examples, predictions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainUseCase;
    use crate::domain::adversarial::AdversarialSettings;

    #[test]
    fn test_missing_checkpoint_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EvaluateConfig {
            checkpoint_path: dir.path().join("nope").display().to_string(),
            data_path:       None,
            epoch:           None,
            output_dir:      None,
            tag:             "eval".into(),
            device:          Some(DeviceKind::Cpu),
        };
        let err = EvaluateUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn test_evaluates_the_best_checkpoint() {
        let dir   = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.txt");
        let valid = dir.path().join("valid.txt");
        std::fs::write(&train, "one two\tthree four\nfive six\tseven\n").unwrap();
        std::fs::write(&valid, "one two\tthree\n").unwrap();

        let ckpt = dir.path().join("ckpt");
        TrainUseCase::new(TrainConfig {
            train_data_path:             train.display().to_string(),
            valid_data_path:             valid.display().to_string(),
            model_name_or_path:          dir.path().join("no-model").display().to_string(),
            checkpoint_path:             ckpt.display().to_string(),
            output_dir:                  dir.path().join("out").display().to_string(),
            device:                      DeviceKind::Cpu,
            max_length:                  8,
            batch_size:                  2,
            eval_batch_size:             1,
            num_epochs:                  1,
            gradient_accumulation_steps: 1,
            d_model:                     16,
            num_heads:                   2,
            num_layers:                  1,
            d_ff:                        32,
            lora_rank:                   2,
            adversarial: AdversarialSettings { max_norm: 0.5, newton_epochs: 0, ..Default::default() },
            ..Default::default()
        })
        .execute()
        .unwrap();

        let summary = EvaluateUseCase::new(EvaluateConfig {
            checkpoint_path: ckpt.display().to_string(),
            data_path:       None,
            epoch:           None,
            output_dir:      Some(dir.path().join("eval").display().to_string()),
            tag:             "eval".into(),
            device:          Some(DeviceKind::Cpu),
        })
        .execute()
        .unwrap();

        assert_eq!(summary.epoch, 0);
        assert_eq!(summary.examples, 1);
        assert!(summary.loss.is_finite());
        let text = std::fs::read_to_string(&summary.predictions).unwrap();
        assert!(text.starts_with("Input:"));
        assert!(summary.predictions.ends_with("output_at_eval.txt"));
    }
}
