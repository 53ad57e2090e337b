// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// Checkpoint directory layout:
//   checkpoints/
//     model_0.mpk            ← weights after an improving epoch 0
//     model_3.mpk            ← ... and after epoch 3
//     best_checkpoint.json   ← {"epoch": 3, "val_loss": 0.71}
//     train_config.json      ← the run's TrainConfig
//     model_config.json      ← architecture, to rebuild the model
//     tokenizer.json         ← written by TokenizerStore
//
// Per-epoch files are never overwritten by a later epoch, so
// older improvements stay on disk; best_checkpoint.json always
// names the latest improvement.
//
// Burn's CompactRecorder:
//   - named MessagePack, half precision
//   - appends ".mpk" itself, so paths are passed without it
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::selection::BestCheckpoint;
use crate::ml::model::CausalLmConfig;

pub const RECORD_EXTENSION: &str = ".mpk";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Opens an existing directory without creating it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(
            dir.is_dir(),
            "Checkpoint directory '{}' does not exist. Have you run 'train' first?",
            dir.display()
        );
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `model_{epoch}.mpk` and point best_checkpoint.json at it.
    pub fn save_best<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        best:  &BestCheckpoint,
    ) -> Result<PathBuf> {
        let stem = self.dir.join(format!("model_{}", best.epoch));

        CompactRecorder::new()
            .record(model.clone().into_record(), stem.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", stem.display()))?;

        let pointer = self.dir.join("best_checkpoint.json");
        fs::write(&pointer, serde_json::to_string_pretty(best)?)
            .with_context(|| format!("Failed to write '{}'", pointer.display()))?;

        tracing::debug!("Saved checkpoint: epoch {} (val_loss {:.6})", best.epoch, best.val_loss);
        Ok(record_path(&stem))
    }

    pub fn load_best(&self) -> Result<BestCheckpoint> {
        let path = self.dir.join("best_checkpoint.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read '{}'. No epoch has been checkpointed yet.", path.display())
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load the weights of `epoch`, or of the best epoch when `None`.
    /// Returns the model and the epoch that was loaded.
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        epoch:  Option<usize>,
        device: &B::Device,
    ) -> Result<(M, usize)> {
        let epoch = match epoch {
            Some(epoch) => epoch,
            None        => self.load_best()?.epoch,
        };
        let path = self.dir.join(format!("model_{epoch}"));
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        Ok((load_weights(model, &path, device)?, epoch))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'evaluate'.",
                path.display()
            )
        })?;
        serde_json::from_str(&json).with_context(|| format!("Malformed '{}'", path.display()))
    }

    pub fn save_model_config(&self, cfg: &CausalLmConfig) -> Result<()> {
        let path = self.dir.join("model_config.json");
        cfg.save(&path)
            .with_context(|| format!("Cannot write model config to '{}'", path.display()))
    }

    pub fn load_model_config(&self) -> Result<CausalLmConfig> {
        let path = self.dir.join("model_config.json");
        CausalLmConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read model config '{}': {e}", path.display()))
    }
}

/// File the recorder writes for `stem`.
pub fn record_path(stem: &Path) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(RECORD_EXTENSION);
    PathBuf::from(name)
}

/// `dir/model.mpk` and `dir/model` name the same record.
pub fn record_stem(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(RECORD_EXTENSION) {
        Some(stem) => PathBuf::from(stem),
        None       => path.to_path_buf(),
    }
}

/// Load a CompactRecorder record into `model`.
pub fn load_weights<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let stem = record_stem(path);
    let record = CompactRecorder::new()
        .load(stem.clone(), device)
        .with_context(|| format!("Cannot load weights from '{}{RECORD_EXTENSION}'", stem.display()))?;
    Ok(model.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::ml::model::{tests::tiny_config, LoraCausalLm};

    type TB = NdArray;

    #[test]
    fn test_record_stem_strips_extension_once() {
        assert_eq!(record_stem(Path::new("ckpt/model_3.mpk")), PathBuf::from("ckpt/model_3"));
        assert_eq!(record_stem(Path::new("ckpt/model_3")), PathBuf::from("ckpt/model_3"));
    }

    #[test]
    fn test_best_pointer_follows_latest_save() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let model: LoraCausalLm<TB> = tiny_config().init(&Default::default());

        let first = manager.save_best(&model, &BestCheckpoint { epoch: 0, val_loss: 0.9 }).unwrap();
        manager.save_best(&model, &BestCheckpoint { epoch: 2, val_loss: 0.7 }).unwrap();

        assert!(first.exists(), "{} missing", first.display());
        assert!(dir.path().join("model_2.mpk").exists());
        assert_eq!(manager.load_best().unwrap().epoch, 2);
    }

    #[test]
    fn test_weights_round_trip_through_best_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let device  = Default::default();

        let saved: LoraCausalLm<TB> = tiny_config().init(&device);
        manager.save_best(&saved, &BestCheckpoint { epoch: 1, val_loss: 0.5 }).unwrap();

        let fresh: LoraCausalLm<TB> = tiny_config().init(&device);
        let (loaded, epoch) = manager.load_model(fresh, None, &device).unwrap();
        assert_eq!(epoch, 1);

        // half-precision storage: compare with a loose tolerance
        let diff: f32 = (saved.lm_head.weight.val() - loaded.lm_head.weight.val())
            .abs()
            .max()
            .into_scalar()
            .elem::<f32>();
        assert!(diff < 1e-2, "weights changed by {diff}");
    }

    #[test]
    fn test_model_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        manager.save_model_config(&tiny_config()).unwrap();
        let loaded = manager.load_model_config().unwrap();
        assert_eq!(loaded.d_model, 16);
        assert_eq!(loaded.lora.rank, 4);
    }
}
