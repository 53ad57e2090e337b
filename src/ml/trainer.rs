// ============================================================
// Layer 5 - Adversarial Training Loop
// ============================================================
// Epoch loop around the ascent controller:
//
//   for epoch:
//     regime = UpdateSchedule(epoch)       gradient ascent / newton
//     for batch:
//       AscentController::run              K steps, grads accumulated
//       if the window closes:
//         clip global norm → AdamW step → advance linear LR
//     evaluate on the inner backend        loss + output_at_{epoch}.txt
//     checkpoint if val loss improved
//
// Training uses Autodiff<B>; model.valid() gives the same
// weights on the inner backend for validation, with dropout off.
//
// Reference: Burn Book §5 (Custom Training Loops)
//            Loshchilov & Hutter (2019) AdamW

use std::{marker::PhantomData, path::PathBuf};

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::data::{
    batcher::{LmBatch, LmBatcher},
    dataset::LmDataset,
};
use crate::domain::{
    accounting::{closes_window, LossTracker, RunPlan},
    adversarial::{AdversarialSettings, UpdateRegime},
    selection::BestLossTracker,
    traits::TextCodec,
};
use crate::error::{Stage, TrainError};
use crate::infra::{
    checkpoint::{load_weights, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
    prediction_log::PredictionLog,
};
use crate::ml::{
    adversarial::ascent::{AscentController, AscentReport},
    clip::clip_global_norm,
    evaluator::Evaluator,
    model::{CausalLmConfig, LanguageModel, LoraCausalLm},
    schedule::LinearDecay,
};

// ─── Per-batch driver ─────────────────────────────────────────────────────────
/// What one call to `train_batch` did.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub ascent:       AscentReport,
    /// Global gradient norm before clipping, when the window closed
    pub stepped_norm: Option<f64>,
}

/// Owns the model, the optimizer and the gradient accumulator;
/// turns batches into parameter updates.
pub struct AdversarialTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    model:              M,
    optim:              O,
    accumulator:        GradientsAccumulator<M>,
    controller:         AscentController,
    lr:                 LinearDecay,
    max_grad_norm:      f64,
    accumulation_steps: usize,
    optimizer_steps:    usize,
    backend:            PhantomData<B>,
}

impl<B, M, O> AdversarialTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LanguageModel<B>,
    O: Optimizer<M, B>,
{
    pub fn new(
        model:              M,
        optim:              O,
        settings:           AdversarialSettings,
        lr:                 LinearDecay,
        max_grad_norm:      f64,
        accumulation_steps: usize,
        seed:               u64,
    ) -> Self {
        let accumulation_steps = accumulation_steps.max(1);
        Self {
            model,
            optim,
            accumulator: GradientsAccumulator::new(),
            controller: AscentController::new(settings, accumulation_steps, seed),
            lr,
            max_grad_norm,
            accumulation_steps,
            optimizer_steps: 0,
            backend: PhantomData,
        }
    }

    /// Run the ascent loop on one micro-batch and, if it closes an
    /// accumulation window, update the parameters.
    pub fn train_batch(
        &mut self,
        batch:       &LmBatch<B>,
        regime:      UpdateRegime,
        step:        usize,
        num_batches: usize,
    ) -> Result<BatchOutcome, TrainError> {
        let ascent = self.controller.run(&self.model, batch, regime, &mut self.accumulator)?;

        let stepped_norm = if closes_window(step, num_batches, self.accumulation_steps) {
            Some(self.optimizer_step()?)
        } else {
            None
        };
        Ok(BatchOutcome { ascent, stepped_norm })
    }

    fn optimizer_step(&mut self) -> Result<f64, TrainError> {
        let mut grads = self.accumulator.grads();
        let norm = clip_global_norm::<B, M>(&self.model, &mut grads, self.max_grad_norm);
        TrainError::check_finite(Stage::OptimizerStep, "global gradient norm", norm)?;

        let lr = self.lr.current();
        self.model = self.optim.step(lr, self.model.clone(), grads);
        self.lr.advance();
        self.optimizer_steps += 1;

        tracing::debug!("optimizer step {}: grad_norm={:.4e}, lr={:.3e}", self.optimizer_steps, norm, lr);
        Ok(norm)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer_steps(&self) -> usize {
        self.optimizer_steps
    }

    /// Rate the next optimizer step will use.
    pub fn current_lr(&self) -> f64 {
        self.lr.current()
    }
}

// ─── Runtime entry point ──────────────────────────────────────────────────────
/// Pick the backend the config asks for and train on it.
pub fn run_training(
    cfg:           &TrainConfig,
    model_cfg:     &CausalLmConfig,
    pretrained:    Option<PathBuf>,
    codec:         &dyn TextCodec,
    train_dataset: LmDataset,
    valid_dataset: LmDataset,
    ckpt:          CheckpointManager,
) -> Result<()> {
    match cfg.device {
        DeviceKind::Gpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            train_loop::<Autodiff<Wgpu>>(cfg, model_cfg, pretrained, codec, train_dataset, valid_dataset, ckpt, device)
        }
        DeviceKind::Cpu => {
            let device = NdArrayDevice::Cpu;
            tracing::info!("Using NdArray device: {:?}", device);
            train_loop::<Autodiff<NdArray>>(cfg, model_cfg, pretrained, codec, train_dataset, valid_dataset, ckpt, device)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn train_loop<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    model_cfg:     &CausalLmConfig,
    pretrained:    Option<PathBuf>,
    codec:         &dyn TextCodec,
    train_dataset: LmDataset,
    valid_dataset: LmDataset,
    ckpt:          CheckpointManager,
    device:        B::Device,
) -> Result<()> {
    B::seed(cfg.seed);

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: LoraCausalLm<B> = model_cfg.init(&device);
    if let Some(path) = &pretrained {
        model = load_weights(model, path, &device)?.freeze_pretrained();
        tracing::info!("Loaded pretrained weights from '{}'", path.display());
    }
    let adapters = model.adapter_params();
    let total    = model.num_params();
    tracing::info!(
        "trainable params: {} || all params: {} || trainable%: {:.4}",
        adapters,
        total,
        100.0 * adapters as f64 / total.max(1) as f64
    );

    // ── Data loaders ──────────────────────────────────────────────────────────
    let accum             = cfg.gradient_accumulation_steps;
    let batches_per_epoch = train_dataset.batch_count(cfg.batch_size);
    let valid_batches     = valid_dataset.batch_count(cfg.eval_batch_size);
    if valid_batches == 0 {
        tracing::warn!("Validation set is empty; no checkpoint will be written");
    }

    let train_loader = DataLoaderBuilder::new(LmBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);
    let valid_loader = DataLoaderBuilder::new(LmBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.eval_batch_size)
        .num_workers(1)
        .build(valid_dataset);

    // ── Run plan ──────────────────────────────────────────────────────────────
    let plan = RunPlan::new(cfg.num_epochs, cfg.max_steps, batches_per_epoch, accum);
    tracing::info!("==========Start training==========");
    tracing::info!("Total train batch size (w. accumulation) = {}", cfg.batch_size * accum);
    tracing::info!("Gradient accumulation steps = {}", accum);
    tracing::info!("Total optimization steps = {}", plan.total_steps);

    // ── AdamW over the adapters ───────────────────────────────────────────────
    let optim = AdamWConfig::new()
        .with_weight_decay(cfg.weight_decay as f32)
        .init();
    let schedule = cfg.adversarial.schedule();
    let mut trainer = AdversarialTrainer::new(
        model,
        optim,
        cfg.adversarial.clone(),
        LinearDecay::new(cfg.learning_rate, plan.total_steps),
        cfg.max_grad_norm,
        accum,
        cfg.seed,
    );
    let mut evaluator = Evaluator::new(&cfg.adversarial, accum, cfg.seed.wrapping_add(1));

    let metrics     = MetricsLogger::new(ckpt.dir())?;
    let predictions = PredictionLog::new(&cfg.output_dir)?;
    let mut best    = BestLossTracker::new();

    let mut losses     = LossTracker::new();
    let mut interval   = LossTracker::new();
    let mut eval_total = 0.0f64;
    let mut eval_steps = 0usize;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 0..plan.num_epochs {
        let regime = schedule.regime_for(epoch, plan.num_epochs);
        tracing::info!("Epoch {}/{}: delta update regime = {}", epoch + 1, plan.num_epochs, regime);

        // ── Training phase ────────────────────────────────────────────────────
        let mut batches   = 0usize;
        let mut exhausted = false;
        for (step, batch) in train_loader.iter().enumerate() {
            let outcome = trainer
                .train_batch(&batch, regime, step, batches_per_epoch)
                .with_context(|| format!("epoch {} batch {}", epoch + 1, step))?;

            let loss = outcome.ascent.scaled_loss();
            losses.add(loss);
            interval.add(loss);
            batches += 1;

            if cfg.logging_steps > 0 && batches % cfg.logging_steps == 0 {
                tracing::info!(
                    "epoch {} batch {}: loss={:.6} lr={:.3e} optimizer_steps={}",
                    epoch + 1,
                    batches,
                    interval.interval_average(cfg.logging_steps),
                    trainer.current_lr(),
                    trainer.optimizer_steps()
                );
            }
            if plan.step_limit.is_some_and(|limit| trainer.optimizer_steps() >= limit) {
                exhausted = true;
                break;
            }
        }
        let train_loss = losses.interval_average(batches);

        // ── Validation phase ──────────────────────────────────────────────────
        // model.valid() → LoraCausalLm<B::InnerBackend>, dropout disabled
        let model_valid = trainer.model().valid();
        let report = evaluator
            .evaluate(&model_valid, valid_loader.iter(), valid_batches, codec)
            .with_context(|| format!("validation after epoch {}", epoch + 1))?;
        eval_total += report.loss_sum;
        eval_steps += report.eval_steps;
        let val_loss = report.average_loss();

        predictions.write(&epoch.to_string(), &report.predictions)?;

        let improved = best.observe(epoch, val_loss);
        if let (true, Some(best)) = (improved, best.best()) {
            tracing::info!("Epoch {}: Saving model and tokenizer...", epoch + 1);
            let path = ckpt.save_best(trainer.model(), &best)?;
            tracing::info!("Epoch {}: Saved '{}'", epoch + 1, path.display());
        }

        metrics.log(&EpochMetrics {
            epoch,
            regime:          regime.to_string(),
            train_loss,
            val_loss,
            optimizer_steps: trainer.optimizer_steps(),
            learning_rate:   trainer.current_lr(),
            checkpoint:      improved,
        })?;

        tracing::info!("Epoch {}: train_loss: {}, valid_loss: {}", epoch + 1, train_loss, val_loss);
        println!(
            "Epoch {:>3}/{} | regime={:<15} | train_loss={:.6} | val_loss={:.6} | steps={}{}",
            epoch + 1,
            plan.num_epochs,
            regime.to_string(),
            train_loss,
            val_loss,
            trainer.optimizer_steps(),
            if improved { " | saved" } else { "" },
        );

        if exhausted {
            tracing::info!("Reached max_steps = {} optimizer steps", trainer.optimizer_steps());
            break;
        }
    }

    let per = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { f64::NAN };
    tracing::info!(
        "Final Summary: train_loss: {}, valid_loss: {}",
        per(losses.total(), trainer.optimizer_steps()),
        per(eval_total, eval_steps)
    );
    if let Some(best) = best.best() {
        tracing::info!("Best epoch {} with valid_loss {:.6}", best.epoch + 1, best.val_loss);
    }
    tracing::info!("Per-epoch metrics in '{}'", metrics.csv_path().display());
    Ok(())
}
