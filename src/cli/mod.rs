// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and hands the result to Layer 2.
//
// Two commands are supported:
//   1. `train`    - adversarial LoRA fine-tuning with per-epoch
//                   validation and best-epoch checkpoints
//   2. `evaluate` - re-score a checkpoint on a dataset
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, LogArgs, TrainArgs};

use crate::infra::logging;

#[derive(Parser, Debug)]
#[command(
    name = "adversarial-lora",
    version,
    about = "Fine-tune a causal language model's LoRA adapters with adversarial embedding perturbations."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Install logging, then dispatch to the use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn init_logging(args: &LogArgs) -> Result<()> {
    let path = logging::init(&args.log, args.debug)?;
    tracing::info!("Logging to '{}'", path.display());
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    init_logging(&args.logging)?;
    tracing::info!("Starting training on '{}'", args.train_data_path);

    let checkpoint_path = args.checkpoint_path.clone();
    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Checkpoints in '{}'.", checkpoint_path);
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    init_logging(&args.logging)?;
    let summary = EvaluateUseCase::new(args.into()).execute()?;

    tracing::info!("Evaluation of epoch {}: loss {}", summary.epoch, summary.loss);
    println!(
        "Epoch {} | examples={} | loss={:.6} | predictions: {}",
        summary.epoch,
        summary.examples,
        summary.loss,
        summary.predictions.display()
    );
    Ok(())
}
