// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Everything that touches the filesystem on behalf of the
// training core:
//
//   checkpoint.rs      - model records, best-epoch pointer and
//                        the saved run/model configuration
//   model_hub.rs       - the pretrained model directory
//   tokenizer_store.rs - tokenizer.json load/build/save and the
//                        TextCodec implementation over it
//   metrics.rs         - per-epoch CSV rows
//   prediction_log.rs  - per-epoch Input/Label/Result files
//   logging.rs         - tracing subscriber (terminal + log file)
//
// Reference: Rust Book §7 (Modules), §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Pretrained model directory
pub mod model_hub;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;

/// Qualitative validation output
pub mod prediction_log;

/// Log file and console subscriber
pub mod logging;
