// ============================================================
// Error Taxonomy
// ============================================================
// Typed errors raised by the training core. The application
// layer wraps these in anyhow with extra context (paths, epoch),
// so the process exits with a chain that names the failing stage.
//
// Three families:
//   - Config:  bad hyperparameters or paths, caught at startup
//   - Data:    malformed dataset records
//   - Numeric: NaN/Inf values or a Gram matrix that cannot be
//              inverted during the Newton step
//
// Reference: Rust Book §9 (Error Handling), thiserror docs

use std::fmt;

use thiserror::Error;

/// The stage of the training loop an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Forward,
    Ascent,
    HessianInversion,
    OptimizerStep,
    Evaluation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Forward          => "forward",
            Stage::Ascent           => "ascent",
            Stage::HessianInversion => "hessian inversion",
            Stage::OptimizerStep    => "optimizer step",
            Stage::Evaluation       => "evaluation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed record in '{path}' line {line}: {reason}")]
    Data {
        path:   String,
        line:   usize,
        reason: String,
    },

    #[error("{stage} failed: {quantity} is not finite ({value})")]
    NonFinite {
        stage:    Stage,
        quantity: &'static str,
        value:    f64,
    },

    #[error("{stage} failed: Gram matrix of sample {sample} is singular")]
    SingularGram { stage: Stage, sample: usize },

    #[error(
        "{stage} failed: Gram matrix of sample {sample} is ill-conditioned \
         (condition estimate {condition:.3e})"
    )]
    IllConditioned {
        stage:     Stage,
        sample:    usize,
        condition: f64,
    },

    #[error("{stage} failed: {reason}")]
    Tensor { stage: Stage, reason: String },
}

impl TrainError {
    /// Fail with `NonFinite` unless `value` is a real number.
    pub fn check_finite(stage: Stage, quantity: &'static str, value: f64) -> Result<f64, TrainError> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(TrainError::NonFinite { stage, quantity, value })
        }
    }
}
