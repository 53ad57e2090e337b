// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here.
//
//   model.rs       - GPT-style causal LM with LoRA adapters on the
//                    attention and MLP output projections
//   lora.rs        - the low-rank adapter wrapped around a Linear
//   loss.rs        - shifted cross-entropy and the logits MSE term
//   adversarial/   - perturbation init, ascent loop, delta update
//                    policies, Newton preconditioner, projection
//   clip.rs        - global gradient-norm clipping over a module
//   schedule.rs    - linear learning-rate decay
//   evaluator.rs   - perturbed validation loss and predictions
//   trainer.rs     - epoch loop, accumulation windows, AdamW steps
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Hu et al. (2021) LoRA
//            Zhu et al. (2020) FreeLB

/// Causal language model with LoRA adapters
pub mod model;

/// Low-rank adapter layer
pub mod lora;

/// Training and smoothing losses
pub mod loss;

/// Embedding-space adversarial training
pub mod adversarial;

/// Gradient clipping
pub mod clip;

/// Learning-rate schedule
pub mod schedule;

/// Validation pass
pub mod evaluator;

/// Training loop with validation and checkpointing
pub mod trainer;
