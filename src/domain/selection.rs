// ============================================================
// Layer 3 - Model Selection
// ============================================================
// Decides after each epoch whether the model is the best seen
// so far. "No best yet" is `None`, never a magic loss value, so
// any real first loss (even a negative or huge one) is accepted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpoint {
    /// Zero-based epoch index the checkpoint was written after
    pub epoch:    usize,
    pub val_loss: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BestLossTracker {
    best: Option<BestCheckpoint>,
}

impl BestLossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's validation loss. Returns true when it is
    /// strictly better than everything before it (a checkpoint
    /// should be written). NaN never counts as an improvement.
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> bool {
        let improved = match self.best {
            None       => !val_loss.is_nan(),
            Some(best) => val_loss < best.val_loss,
        };
        if improved {
            self.best = Some(BestCheckpoint { epoch, val_loss });
        }
        improved
    }

    pub fn best(&self) -> Option<BestCheckpoint> {
        self.best
    }
}
