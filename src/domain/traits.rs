// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The training core only needs two things from the outside
// world: a way to get records, and a way to turn text into
// token ids and back. Both are traits so the data pipeline and
// the evaluator can be tested with in-memory fakes.
//
// Implementations:
//   - RecordSource -> data::loader::TsvRecordLoader
//   - TextCodec    -> tokenizers::Tokenizer (infra::tokenizer_store)
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::record::PromptResponse;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Any component that can produce prompt/response records.
pub trait RecordSource {
    fn load_all(&self) -> Result<Vec<PromptResponse>>;
}

// ─── TextCodec ────────────────────────────────────────────────────────────────
/// Text <-> token id conversion.
pub trait TextCodec {
    /// Encode text without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode ids, dropping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Id used to pad sequences to the fixed length.
    fn pad_id(&self) -> u32;

    /// Id appended after every response.
    fn eos_id(&self) -> u32;

    /// Number of ids the model's embedding table must cover.
    fn vocab_size(&self) -> usize;
}
