// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types and traits that describe the adversarial
// fine-tuning problem without touching Burn or the filesystem.
//
// Rules for this layer:
//   - NO Burn tensor types
//   - NO file I/O
//   - Only structs, enums, traits and the small pieces of
//     arithmetic that decide *when* things happen
//
// Everything here is unit-testable without a device.
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

/// One prompt/response training record
pub mod record;

/// Adversarial hyperparameters and the regime schedule
pub mod adversarial;

/// Loss scaling and running-loss bookkeeping
pub mod accounting;

/// Best-validation-loss model selection
pub mod selection;

/// Core abstractions implemented by other layers
pub mod traits;
