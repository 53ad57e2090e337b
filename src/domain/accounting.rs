// ============================================================
// Layer 3 - Loss Accounting
// ============================================================
// Every ascent step backpropagates
//
//     combined_loss / (gradient_accumulation_steps * K)
//
// so that the K steps of all micro-batches in one accumulation
// window add up to one logical batch worth of gradient.
// LossTracker keeps the running sum of those scaled values and
// turns it into per-interval averages for logging.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossScale {
    pub accumulation_steps: usize,
    pub ascent_steps:       usize,
}

impl LossScale {
    pub fn new(accumulation_steps: usize, ascent_steps: usize) -> Self {
        Self {
            accumulation_steps: accumulation_steps.max(1),
            ascent_steps:       ascent_steps.max(1),
        }
    }

    /// Multiplier applied to one ascent step's combined loss.
    pub fn factor(&self) -> f64 {
        1.0 / (self.accumulation_steps * self.ascent_steps) as f64
    }

    /// Multiplier applied to one validation batch's loss.
    pub fn eval_factor(&self) -> f64 {
        1.0 / self.accumulation_steps as f64
    }
}

/// Running total of scaled losses with interval averaging.
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    total:  f64,
    logged: f64,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scaled_loss: f64) {
        self.total += scaled_loss;
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// `(total - previous_total) / batches`, then marks the interval
    /// as logged. Zero batches yields NaN rather than a division panic.
    pub fn interval_average(&mut self, batches: usize) -> f64 {
        let avg = if batches > 0 {
            (self.total - self.logged) / batches as f64
        } else {
            f64::NAN
        };
        self.logged = self.total;
        avg
    }
}

/// Whether the micro-batch at zero-based `step` closes an
/// accumulation window. The last batch of the loader always does,
/// so a short final window still reaches the optimizer.
pub fn closes_window(step: usize, num_batches: usize, accumulation_steps: usize) -> bool {
    (step + 1) % accumulation_steps.max(1) == 0 || step + 1 == num_batches
}

/// How long a run is, in epochs and optimizer steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub num_epochs:  usize,
    /// Optimizer steps the learning rate decays over
    pub total_steps: usize,
    /// Stop after this many optimizer steps (max_steps mode only)
    pub step_limit:  Option<usize>,
}

impl RunPlan {
    /// `max_steps > 0` overrides `num_epochs`: enough epochs are
    /// planned to cover the steps and the run stops at the limit.
    pub fn new(num_epochs: usize, max_steps: usize, batches_per_epoch: usize, accumulation_steps: usize) -> Self {
        let accum = accumulation_steps.max(1);
        if max_steps > 0 {
            let full_windows = (batches_per_epoch / accum).max(1);
            Self {
                num_epochs:  max_steps / full_windows + 1,
                total_steps: max_steps,
                step_limit:  Some(max_steps),
            }
        } else {
            Self {
                num_epochs,
                total_steps: batches_per_epoch.div_ceil(accum) * num_epochs,
                step_limit:  None,
            }
        }
    }
}
