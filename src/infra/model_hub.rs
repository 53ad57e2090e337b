// ============================================================
// Layer 6 - Pretrained Model Directory
// ============================================================
// A local stand-in for a model hub. `--model-name-or-path`
// points at a directory that may contain
//
//   tokenizer.json      vocabulary (HuggingFace format)
//   model_config.json   CausalLmConfig (Burn Config JSON)
//   model.mpk           pretrained weights (CompactRecorder)
//
// Every file is optional: a missing tokenizer is built from the
// corpus, a missing config comes from the CLI architecture flags,
// missing weights mean a randomly initialised base model.

use anyhow::Result;
use std::path::PathBuf;
use burn::prelude::*;

use crate::infra::{checkpoint::record_path, tokenizer_store::TokenizerStore};
use crate::ml::model::CausalLmConfig;

pub struct ModelHub {
    dir: PathBuf,
}

impl ModelHub {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn tokenizers(&self) -> TokenizerStore {
        TokenizerStore::new(self.dir.clone())
    }

    pub fn model_config(&self) -> Result<Option<CausalLmConfig>> {
        let path = self.dir.join("model_config.json");
        if !path.exists() {
            return Ok(None);
        }
        CausalLmConfig::load(&path)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Cannot read model config '{}': {e}", path.display()))
    }

    /// Path of the pretrained record, if the directory has one.
    pub fn weights(&self) -> Option<PathBuf> {
        let path = record_path(&self.dir.join("model"));
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::{
        backend::NdArray,
        record::{CompactRecorder, Recorder},
    };

    use crate::ml::model::{tests::tiny_config, LoraCausalLm};

    #[test]
    fn test_empty_directory_offers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let hub = ModelHub::new(dir.path());
        assert!(hub.model_config().unwrap().is_none());
        assert!(hub.weights().is_none());
        assert!(!hub.tokenizers().exists());
    }

    #[test]
    fn test_config_is_read_when_present() {
        let dir = tempfile::tempdir().unwrap();
        tiny_config().save(dir.path().join("model_config.json")).unwrap();
        let cfg = ModelHub::new(dir.path()).model_config().unwrap().unwrap();
        assert_eq!(cfg.vocab_size, 32);
    }

    #[test]
    fn test_weights_written_by_the_recorder_are_found() {
        let dir   = tempfile::tempdir().unwrap();
        let model: LoraCausalLm<NdArray> = tiny_config().init(&Default::default());
        CompactRecorder::new()
            .record(model.into_record(), dir.path().join("model"))
            .unwrap();

        let weights = ModelHub::new(dir.path()).weights();
        assert_eq!(weights, Some(dir.path().join("model.mpk")));
    }
}
