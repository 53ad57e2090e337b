// ============================================================
// Layer 3 - Adversarial Settings
// ============================================================
// Hyperparameters of the embedding-space perturbation loop and
// the rule that decides which delta update regime is active.
//
// Two regimes exist:
//   GradientAscent - normalised gradient step + L2 ball projection
//   Newton         - the same step preconditioned by the inverse
//                    Gram matrix of the smoothing-loss curvature
//
// Newton is only used for the last `newton_epochs` epochs.
//
// Reference: Zhu et al. (2020) FreeLB
//            Rust Book §6 (Enums and Pattern Matching)

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::TrainError;

// ─── PerturbationNorm ─────────────────────────────────────────────────────────
/// Norm used to scale and bound delta. Only L2 exists; any other
/// name is rejected when the configuration is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerturbationNorm {
    L2,
}

impl FromStr for PerturbationNorm {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" => Ok(PerturbationNorm::L2),
            other => Err(TrainError::Config(format!(
                "unsupported norm type '{other}' (supported: l2)"
            ))),
        }
    }
}

impl fmt::Display for PerturbationNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerturbationNorm::L2 => f.write_str("l2"),
        }
    }
}

// ─── AdversarialSettings ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialSettings {
    /// Ascent steps K per batch (>= 1)
    pub steps:         usize,
    /// Initial perturbation magnitude epsilon; <= 0 disables delta
    pub init_mag:      f64,
    pub norm:          PerturbationNorm,
    /// Step size of each delta update
    pub lr:            f64,
    /// Radius of the L2 ball delta is projected onto; <= 0 is unbounded
    pub max_norm:      f64,
    /// Weight of the logits-consistency (MSE) term
    pub smooth:        f64,
    /// How many trailing epochs use the Newton regime
    pub newton_epochs: usize,
}

impl Default for AdversarialSettings {
    fn default() -> Self {
        Self {
            steps:         2,
            init_mag:      1.0,
            norm:          PerturbationNorm::L2,
            lr:            2e-5,
            max_norm:      2e-5,
            smooth:        1.0,
            newton_epochs: 2,
        }
    }
}

impl AdversarialSettings {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.steps == 0 {
            return Err(TrainError::Config("adv_steps must be at least 1".into()));
        }
        for (name, value) in [
            ("adv_init_mag", self.init_mag),
            ("adv_lr", self.lr),
            ("adv_max_norm", self.max_norm),
            ("adv_smooth", self.smooth),
        ] {
            if !value.is_finite() {
                return Err(TrainError::Config(format!("{name} must be finite, got {value}")));
            }
        }
        if self.smooth < 0.0 {
            return Err(TrainError::Config("adv_smooth must be non-negative".into()));
        }
        Ok(())
    }

    pub fn schedule(&self) -> UpdateSchedule {
        UpdateSchedule::new(self.newton_epochs)
    }
}

// ─── Update regime schedule ───────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRegime {
    GradientAscent,
    Newton,
}

impl fmt::Display for UpdateRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateRegime::GradientAscent => f.write_str("gradient_ascent"),
            UpdateRegime::Newton         => f.write_str("newton"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    newton_epochs: usize,
}

impl UpdateSchedule {
    pub fn new(newton_epochs: usize) -> Self {
        Self { newton_epochs }
    }

    /// Regime for a zero-based `epoch` out of `num_epochs`.
    /// A run shorter than `newton_epochs` is Newton throughout.
    pub fn regime_for(&self, epoch: usize, num_epochs: usize) -> UpdateRegime {
        if epoch + self.newton_epochs >= num_epochs {
            UpdateRegime::Newton
        } else {
            UpdateRegime::GradientAscent
        }
    }
}
