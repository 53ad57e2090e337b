// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their flags.
//
// clap's derive macros generate --help, the error messages for
// bad values, and the string → number conversions. Norm type
// and device go through their FromStr impls, so a bad name is
// rejected before anything runs.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{
    evaluate_use_case::EvaluateConfig,
    train_use_case::{DeviceKind, TrainConfig},
};
use crate::domain::adversarial::{AdversarialSettings, PerturbationNorm};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune LoRA adapters with adversarial embedding perturbations
    Train(TrainArgs),

    /// Score a dataset with a trained checkpoint
    Evaluate(EvaluateArgs),
}

/// Flags shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log file path; `{datetime}` is replaced by the start time
    #[arg(long, default_value = "logs/train_{datetime}.log")]
    pub log: String,

    /// Log at debug level instead of info
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    // ── data and model paths ─────────────────────────────────────────────────
    /// Training dataset, one `<prompt>\t<response>` per line
    #[arg(long, default_value = "data/train.txt")]
    pub train_data_path: String,

    /// Validation dataset, same format
    #[arg(long, default_value = "data/valid.txt")]
    pub valid_data_path: String,

    /// Directory with tokenizer.json, model_config.json and model.mpk
    #[arg(long, default_value = "models/base")]
    pub model_name_or_path: String,

    /// Weights to start from instead of the model directory's
    #[arg(long)]
    pub init_checkpoint: Option<String>,

    /// Where checkpoints, configs and metrics.csv are written
    #[arg(long, default_value = "checkpoint")]
    pub checkpoint_path: String,

    /// Where the per-epoch prediction files are written
    #[arg(long, default_value = "outputs")]
    pub output_dir: String,

    #[command(flatten)]
    pub logging: LogArgs,

    // ── optimisation ─────────────────────────────────────────────────────────
    /// Maximum tokens per prompt+response sequence
    #[arg(long, default_value_t = 64)]
    pub max_length: usize,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub eval_batch_size: usize,

    #[arg(long, default_value_t = 2e-5)]
    pub learning_rate: f64,

    /// AdamW decoupled weight decay
    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 10)]
    pub num_epochs: usize,

    /// Total optimizer steps; overrides --num-epochs when > 0
    #[arg(long, default_value_t = 0)]
    pub max_steps: usize,

    #[arg(long, default_value_t = 64)]
    pub gradient_accumulation_steps: usize,

    /// Global gradient-norm clip
    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    /// Batches between loss log lines; 0 logs once per epoch
    #[arg(long, default_value_t = 50)]
    pub logging_steps: usize,

    #[arg(long, default_value_t = 2023)]
    pub seed: u64,

    /// gpu (wgpu) or cpu (ndarray)
    #[arg(long, default_value = "gpu")]
    pub device: DeviceKind,

    // ── adversarial perturbation ─────────────────────────────────────────────
    /// Ascent steps per batch
    #[arg(long, default_value_t = 2)]
    pub adv_steps: usize,

    /// Initial perturbation magnitude; 0 starts from a zero delta
    #[arg(long, default_value_t = 1.0)]
    pub adv_init_mag: f64,

    #[arg(long, default_value = "l2")]
    pub norm_type: PerturbationNorm,

    /// Step size of each delta update
    #[arg(long, default_value_t = 2e-5)]
    pub adv_lr: f64,

    /// L2 radius delta is projected onto; 0 is unbounded
    #[arg(long, default_value_t = 2e-5)]
    pub adv_max_norm: f64,

    /// Weight of the logits-consistency term
    #[arg(long, default_value_t = 1.0)]
    pub adv_smooth: f64,

    /// Trailing epochs that use the Newton-step delta update
    #[arg(long, default_value_t = 2)]
    pub newton_epochs: usize,

    // ── LoRA ─────────────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 8)]
    pub lora_rank: usize,

    #[arg(long, default_value_t = 32.0)]
    pub lora_alpha: f64,

    #[arg(long, default_value_t = 0.1)]
    pub lora_dropout: f64,

    // ── architecture (only used without model_config.json) ────────────────────
    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Cap on the vocabulary built from the corpus
    #[arg(long, default_value_t = 8192)]
    pub vocab_size: usize,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_data_path:    a.train_data_path,
            valid_data_path:    a.valid_data_path,
            model_name_or_path: a.model_name_or_path,
            checkpoint_path:    a.checkpoint_path,
            output_dir:         a.output_dir,
            log:                a.logging.log,
            init_checkpoint:    a.init_checkpoint,

            max_length:                  a.max_length,
            batch_size:                  a.batch_size,
            eval_batch_size:             a.eval_batch_size,
            learning_rate:               a.learning_rate,
            weight_decay:                a.weight_decay,
            num_epochs:                  a.num_epochs,
            max_steps:                   a.max_steps,
            gradient_accumulation_steps: a.gradient_accumulation_steps,
            max_grad_norm:               a.max_grad_norm,
            logging_steps:               a.logging_steps,
            seed:                        a.seed,
            device:                      a.device,

            adversarial: AdversarialSettings {
                steps:         a.adv_steps,
                init_mag:      a.adv_init_mag,
                norm:          a.norm_type,
                lr:            a.adv_lr,
                max_norm:      a.adv_max_norm,
                smooth:        a.adv_smooth,
                newton_epochs: a.newton_epochs,
            },

            lora_rank:    a.lora_rank,
            lora_alpha:   a.lora_alpha,
            lora_dropout: a.lora_dropout,

            d_model:    a.d_model,
            num_heads:  a.num_heads,
            num_layers: a.num_layers,
            d_ff:       a.d_ff,
            dropout:    a.dropout,
            vocab_size: a.vocab_size,
        }
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint directory written by `train`
    #[arg(long, default_value = "checkpoint")]
    pub checkpoint_path: String,

    /// Dataset to score; defaults to the run's validation file
    #[arg(long)]
    pub data_path: Option<String>,

    /// Epoch to load; defaults to the best one
    #[arg(long)]
    pub epoch: Option<usize>,

    /// Defaults to the run's output directory
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Predictions go to output_at_{tag}.txt
    #[arg(long, default_value = "eval")]
    pub tag: String,

    /// Overrides the device the run trained on
    #[arg(long)]
    pub device: Option<DeviceKind>,

    #[command(flatten)]
    pub logging: LogArgs,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            checkpoint_path: a.checkpoint_path,
            data_path:       a.data_path,
            epoch:           a.epoch,
            output_dir:      a.output_dir,
            tag:             a.tag,
            device:          a.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["adversarial-lora", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        let def = TrainConfig::default();

        assert_eq!(cfg.max_length, def.max_length);
        assert_eq!(cfg.gradient_accumulation_steps, 64);
        assert_eq!(cfg.seed, 2023);
        assert_eq!(cfg.adversarial.steps, 2);
        assert_eq!(cfg.adversarial.max_norm, 2e-5);
        assert_eq!(cfg.log, "logs/train_{datetime}.log");
        assert_eq!(cfg.device, DeviceKind::Gpu);
    }

    #[test]
    fn test_adversarial_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "adversarial-lora", "train",
            "--adv-steps", "3",
            "--adv-init-mag", "0",
            "--norm-type", "L2",
            "--device", "cpu",
            "--max-steps", "100",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.adversarial.steps, 3);
        assert_eq!(cfg.adversarial.init_mag, 0.0);
        assert_eq!(cfg.adversarial.norm, PerturbationNorm::L2);
        assert_eq!(cfg.device, DeviceKind::Cpu);
        assert_eq!(cfg.max_steps, 100);
    }

    #[test]
    fn test_unknown_norm_type_is_rejected() {
        let result = Cli::try_parse_from(["adversarial-lora", "train", "--norm-type", "linf"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_evaluate_arguments() {
        let cli = Cli::try_parse_from([
            "adversarial-lora", "evaluate", "--checkpoint-path", "ckpt", "--epoch", "3", "--debug",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        assert!(args.logging.debug);
        let cfg: EvaluateConfig = args.into();
        assert_eq!(cfg.checkpoint_path, "ckpt");
        assert_eq!(cfg.epoch, Some(3));
        assert_eq!(cfg.tag, "eval");
        assert!(cfg.device.is_none());
    }
}
