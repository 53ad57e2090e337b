// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration       (Layer 2)
//   Step 2: Load train/valid records         (Layer 4 - data)
//   Step 3: Load or build the tokenizer      (Layer 6 - infra)
//   Step 4: Collate records into samples     (Layer 4 - data)
//   Step 5: Resolve the model architecture   (Layer 6 - infra)
//   Step 6: Save config + tokenizer          (Layer 6 - infra)
//   Step 7: Run the adversarial training loop (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use std::{fmt, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{collator::CausalLmCollator, dataset::LmDataset, loader::TsvRecordLoader};
use crate::domain::{
    adversarial::AdversarialSettings,
    record::PromptResponse,
    traits::{RecordSource, TextCodec},
};
use crate::error::TrainError;
use crate::infra::{
    checkpoint::CheckpointManager,
    model_hub::ModelHub,
    tokenizer_store::{HfCodec, TokenizerStore},
};
use crate::ml::{lora::LoraConfig, model::CausalLmConfig, trainer::run_training};

// ─── Device selection ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// wgpu, whatever adapter the platform offers
    Gpu,
    /// ndarray on the host
    Cpu,
}

impl FromStr for DeviceKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" | "cuda" | "wgpu" => Ok(DeviceKind::Gpu),
            "cpu" | "ndarray"       => Ok(DeviceKind::Cpu),
            other => Err(TrainError::Config(format!("unknown device '{other}' (expected gpu or cpu)"))),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => f.write_str("gpu"),
            DeviceKind::Cpu => f.write_str("cpu"),
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a run needs. Saved as train_config.json so the
// evaluate command can rebuild the same pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    // paths
    pub train_data_path:    String,
    pub valid_data_path:    String,
    pub model_name_or_path: String,
    pub checkpoint_path:    String,
    pub output_dir:         String,
    pub log:                String,
    pub init_checkpoint:    Option<String>,

    // optimisation
    pub max_length:                  usize,
    pub batch_size:                  usize,
    pub eval_batch_size:             usize,
    pub learning_rate:               f64,
    pub weight_decay:                f64,
    pub num_epochs:                  usize,
    /// > 0 overrides num_epochs
    pub max_steps:                   usize,
    pub gradient_accumulation_steps: usize,
    pub max_grad_norm:               f64,
    /// Batches between interval-loss log lines; 0 logs per epoch only
    pub logging_steps:               usize,
    pub seed:                        u64,
    pub device:                      DeviceKind,

    pub adversarial: AdversarialSettings,

    // low-rank adaptation
    pub lora_rank:    usize,
    pub lora_alpha:   f64,
    pub lora_dropout: f64,

    // architecture, used when the model directory has no model_config.json
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub dropout:    f64,
    pub vocab_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_data_path:    "data/train.txt".to_string(),
            valid_data_path:    "data/valid.txt".to_string(),
            model_name_or_path: "models/base".to_string(),
            checkpoint_path:    "checkpoint".to_string(),
            output_dir:         "outputs".to_string(),
            log:                "logs/train_{datetime}.log".to_string(),
            init_checkpoint:    None,

            max_length:                  64,
            batch_size:                  4,
            eval_batch_size:             4,
            learning_rate:               2e-5,
            weight_decay:                0.01,
            num_epochs:                  10,
            max_steps:                   0,
            gradient_accumulation_steps: 64,
            max_grad_norm:               1.0,
            logging_steps:               50,
            seed:                        2023,
            device:                      DeviceKind::Gpu,

            adversarial: AdversarialSettings::default(),

            lora_rank:    8,
            lora_alpha:   32.0,
            lora_dropout: 0.1,

            d_model:    256,
            num_heads:  8,
            num_layers: 4,
            d_ff:       1024,
            dropout:    0.1,
            vocab_size: 8192,
        }
    }
}

impl TrainConfig {
    /// Startup checks; nothing touches the filesystem before this passes.
    pub fn validate(&self) -> Result<(), TrainError> {
        let positive = [
            ("max_length", self.max_length),
            ("batch_size", self.batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("gradient_accumulation_steps", self.gradient_accumulation_steps),
            ("lora_rank", self.lora_rank),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(TrainError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.num_epochs == 0 && self.max_steps == 0 {
            return Err(TrainError::Config("either num_epochs or max_steps must be positive".into()));
        }
        if self.max_length < 2 {
            return Err(TrainError::Config("max_length must leave room for a shifted target".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.max_grad_norm.is_finite() || !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainError::Config("max_grad_norm and weight_decay must be finite, weight_decay >= 0".into()));
        }
        for (name, path) in [("train_data_path", &self.train_data_path), ("valid_data_path", &self.valid_data_path)] {
            if path.trim().is_empty() {
                return Err(TrainError::Config(format!("{name} is empty")));
            }
        }
        self.adversarial.validate()?;
        self.fallback_model_config(self.vocab_size)
            .validate()
            .map_err(TrainError::Config)
    }

    pub fn lora(&self) -> LoraConfig {
        LoraConfig::new()
            .with_rank(self.lora_rank)
            .with_alpha(self.lora_alpha)
            .with_dropout(self.lora_dropout)
    }

    /// Architecture from the CLI flags, for a model directory
    /// without model_config.json.
    pub fn fallback_model_config(&self, vocab_size: usize) -> CausalLmConfig {
        CausalLmConfig::new(
            vocab_size,
            self.max_length,
            self.d_model,
            self.num_heads,
            self.num_layers,
            self.d_ff,
            self.lora(),
        )
        .with_dropout(self.dropout)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;
        tracing::info!("Parsed config: {}", serde_json::to_string_pretty(cfg)?);

        // ── Step 2: Load records ──────────────────────────────────────────────
        let train_records = TsvRecordLoader::new(&cfg.train_data_path).load_all()?;
        let valid_records = TsvRecordLoader::new(&cfg.valid_data_path).load_all()?;
        anyhow::ensure!(!train_records.is_empty(), "No training records in '{}'", cfg.train_data_path);
        tracing::info!(
            "Loaded {} train / {} validation records",
            train_records.len(),
            valid_records.len()
        );

        // ── Step 3: Tokenizer ─────────────────────────────────────────────────
        // the model directory's tokenizer wins; otherwise build one
        // from the training corpus into the checkpoint directory
        let hub       = ModelHub::new(&cfg.model_name_or_path);
        let ckpt      = CheckpointManager::new(&cfg.checkpoint_path)?;
        let ckpt_toks = TokenizerStore::new(ckpt.dir());
        let tokenizer = if hub.tokenizers().exists() {
            hub.tokenizers().load()?
        } else {
            tracing::warn!(
                "No tokenizer.json in '{}'; building a word-level vocabulary from the training data",
                cfg.model_name_or_path
            );
            ckpt_toks.load_or_build(&corpus(&train_records), cfg.vocab_size)?
        };
        let codec = HfCodec::new(tokenizer)?;

        // ── Step 4: Collate ───────────────────────────────────────────────────
        let collator      = CausalLmCollator::new(cfg.max_length);
        let train_dataset = LmDataset::new(collator.collate_all(&train_records, &codec)?);
        let valid_dataset = LmDataset::new(collator.collate_all(&valid_records, &codec)?);

        // ── Step 5: Architecture ──────────────────────────────────────────────
        let model_cfg = match hub.model_config()? {
            Some(model_cfg) => CausalLmConfig { lora: cfg.lora(), ..model_cfg },
            None            => cfg.fallback_model_config(codec.vocab_size()),
        };
        model_cfg.validate().map_err(TrainError::Config)?;
        anyhow::ensure!(
            model_cfg.max_seq_len >= cfg.max_length,
            "model supports {} positions but max_length is {}",
            model_cfg.max_seq_len,
            cfg.max_length
        );
        anyhow::ensure!(
            model_cfg.vocab_size >= codec.vocab_size(),
            "model vocabulary ({}) is smaller than the tokenizer's ({})",
            model_cfg.vocab_size,
            codec.vocab_size()
        );

        // ── Step 6: Persist what evaluation needs ─────────────────────────────
        ckpt.save_config(cfg)?;
        ckpt.save_model_config(&model_cfg)?;
        ckpt_toks.save(codec.tokenizer())?;

        // ── Step 7: Train (Layer 5) ───────────────────────────────────────────
        let pretrained = match &cfg.init_checkpoint {
            Some(path) => Some(path.into()),
            None       => hub.weights(),
        };
        run_training(cfg, &model_cfg, pretrained, &codec, train_dataset, valid_dataset, ckpt)
            .context("training aborted")
    }
}

/// Every prompt and response, for building a fallback vocabulary.
fn corpus(records: &[PromptResponse]) -> Vec<String> {
    records
        .iter()
        .flat_map(|r| [r.prompt.clone(), r.response.clone()])
        .collect()
}
