// ============================================================
// Layer 6 - Tokenizer Store
// ============================================================
// Loads the model's tokenizer.json, or builds a word-level one
// from the training corpus when the model directory has none,
// and copies it next to the checkpoints so evaluation decodes
// with exactly the vocabulary training used.
//
// The fallback vocabulary is written as HuggingFace tokenizer
// JSON and loaded back through Tokenizer::from_file, which keeps
// the tokenizers crate in charge of the actual splitting.
//
// Special tokens of the fallback: [PAD]=0, [UNK]=1, [EOS]=2.
//
// Reference: HuggingFace tokenizers docs (WordLevel model)

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf};
use tokenizers::{
    pre_tokenizers::whitespace::Whitespace, OffsetReferential, OffsetType, PreTokenizedString,
    PreTokenizer, Tokenizer,
};

use crate::domain::traits::TextCodec;

const PAD_TOKENS: [&str; 3] = ["[PAD]", "<pad>", "<|pad|>"];
const EOS_TOKENS: [&str; 4] = ["<|endoftext|>", "</s>", "[EOS]", "<eos>"];
const RESERVED:   usize     = 3;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load an existing tokenizer or build one from `texts`.
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if self.exists() {
            tracing::info!("Loading tokenizer from '{}'", self.path().display());
            self.load()
        } else {
            tracing::info!("Building word-level tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot save tokenizer to '{}': {}", path.display(), e))
    }

    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: word frequencies over the pre-tokenizer's pieces ─────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for piece in pre_tokenize(text)? {
                *freq.entry(piece.to_lowercase()).or_insert(0) += 1;
            }
        }

        // most frequent first, ties broken alphabetically so builds are reproducible
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(RESERVED));

        // ── Step 2: vocab with contiguous ids ─────────────────────────────────
        let mut vocab = serde_json::json!({ "[PAD]": 0, "[UNK]": 1, "[EOS]": 2 });
        for (id, (word, _)) in words.iter().enumerate() {
            vocab[word] = serde_json::json!(id + RESERVED);
        }

        // ── Step 3: HuggingFace tokenizer JSON ────────────────────────────────
        let special = |id: usize, content: &str| {
            serde_json::json!({
                "id": id, "content": content, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        };
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [special(0, "[PAD]"), special(1, "[UNK]"), special(2, "[EOS]")],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        });

        let path = self.path();
        std::fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;

        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            words.len() + RESERVED,
            path.display()
        );
        self.load()
    }
}

/// Pieces the Whitespace pre-tokenizer makes of `text`, so the
/// vocabulary holds exactly what encoding will look up.
fn pre_tokenize(text: &str) -> Result<Vec<String>> {
    let mut pre = PreTokenizedString::from(text);
    Whitespace::default()
        .pre_tokenize(&mut pre)
        .map_err(|e| anyhow::anyhow!("Cannot pre-tokenize: {}", e))?;
    Ok(pre
        .get_splits(OffsetReferential::Original, OffsetType::Byte)
        .into_iter()
        .map(|(piece, _, _)| piece.to_string())
        .collect())
}

// ─── TextCodec over a HuggingFace tokenizer ───────────────────────────────────
pub struct HfCodec {
    tokenizer: Tokenizer,
    pad_id:    u32,
    eos_id:    u32,
}

impl HfCodec {
    /// Finds the end-of-sequence token among the usual names; the
    /// pad token falls back to EOS when the vocabulary has none.
    pub fn new(tokenizer: Tokenizer) -> Result<Self> {
        let find = |names: &[&str]| names.iter().find_map(|name| tokenizer.token_to_id(name));

        let eos_id = find(&EOS_TOKENS).ok_or_else(|| {
            anyhow::anyhow!("Tokenizer has no end-of-sequence token (tried {:?})", EOS_TOKENS)
        })?;
        let pad_id = find(&PAD_TOKENS).unwrap_or(eos_id);

        Ok(Self { tokenizer, pad_id, eos_id })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TextCodec for HfCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {e}"))
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_tokenize_splits_words_and_punctuation() {
        assert_eq!(
            pre_tokenize("Hello, world!!  ok_1").unwrap(),
            vec!["Hello", ",", "world", "!!", "ok_1"]
        );
        assert!(pre_tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_words_with_combining_marks_are_in_vocab() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        // "cafe" followed by a combining acute accent
        let texts = vec!["cafe\u{301} re\u{301}sume\u{301}".to_string()];
        let codec = HfCodec::new(store.load_or_build(&texts, 64).unwrap()).unwrap();

        let ids = codec.encode(&texts[0]).unwrap();
        assert!(!ids.is_empty());
        assert!(ids.iter().all(|&id| id != 1), "no piece may fall back to [UNK]: {:?}", ids);
    }

    #[test]
    fn test_built_tokenizer_round_trips_known_words() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let texts = vec!["the cat sat".to_string(), "the dog sat, too".to_string()];

        let codec = HfCodec::new(store.load_or_build(&texts, 64).unwrap()).unwrap();
        assert_eq!(codec.pad_id(), 0);
        assert_eq!(codec.eos_id(), 2);
        assert_eq!(codec.vocab_size(), 3 + 6);

        let ids = codec.encode("The cat sat").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|&id| id >= 3));

        let mut with_specials = ids.clone();
        with_specials.extend([2, 0, 0]);
        assert_eq!(codec.decode(&with_specials).unwrap(), "the cat sat");
    }

    #[test]
    fn test_vocab_is_capped() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let texts = vec!["a b c d e f g h".to_string()];
        let codec = HfCodec::new(store.load_or_build(&texts, 5).unwrap()).unwrap();
        assert_eq!(codec.vocab_size(), 5);
        // unknown words map to [UNK]
        assert_eq!(codec.encode("zebra").unwrap(), vec![1]);
    }

    #[test]
    fn test_second_call_loads_instead_of_rebuilding() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        store.load_or_build(&["alpha beta".to_string()], 16).unwrap();
        let again = store.load_or_build(&["gamma".to_string()], 16).unwrap();
        assert!(again.token_to_id("alpha").is_some());
        assert!(again.token_to_id("gamma").is_none());
    }
}
