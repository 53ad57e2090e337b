// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Orchestrates the other layers for one goal each: a training
// run, or re-scoring a finished run's checkpoint.
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// Standalone evaluation of a saved checkpoint
pub mod evaluate_use_case;
