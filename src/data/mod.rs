// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// From dataset files to device-ready tensor batches:
//
//   prompt\tresponse file
//       │
//       ▼
//   TsvRecordLoader   → reads lines, splits fields
//       │
//       ▼
//   Preprocessor      → normalises whitespace/control chars
//       │
//       ▼
//   CausalLmCollator  → token ids, attention mask, labels
//       │
//       ▼
//   LmDataset         → implements Burn's Dataset trait
//       │
//       ▼
//   LmBatcher         → stacks samples into [batch, seq] tensors
//       │
//       ▼
//   DataLoader        → feeds batches to trainer / evaluator
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads prompt/response records from text files
pub mod loader;

/// Cleans individual record fields
pub mod preprocessor;

/// Tokenises records into fixed-length causal LM samples
pub mod collator;

/// Implements Burn's Dataset trait for LM samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
