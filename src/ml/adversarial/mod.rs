// ============================================================
// Layer 5 - Embedding-Space Adversarial Training
// ============================================================
// Per-batch perturbation loop on the token embeddings:
//
//   delta      → seeded initial perturbation, zero on padding
//   projection → per-sample L2 norms and ball projection
//   policy     → how one ascent step updates delta
//   newton     → (H Hᵀ)⁻¹ H preconditioner for the late epochs
//   ascent     → the K-step controller tying them together

pub mod ascent;
pub mod delta;
pub mod newton;
pub mod policy;
pub mod projection;
