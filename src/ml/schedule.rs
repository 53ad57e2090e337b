// ─── Linear learning-rate decay ───────────────────────────────────────────────
// lr_t = lr_0 · max(0, (T - t) / T) over T optimizer steps, no
// warmup. The rate is read before a step and advanced after it.

#[derive(Debug, Clone)]
pub struct LinearDecay {
    base_lr:     f64,
    total_steps: usize,
    step:        usize,
}

impl LinearDecay {
    pub fn new(base_lr: f64, total_steps: usize) -> Self {
        Self { base_lr, total_steps: total_steps.max(1), step: 0 }
    }

    pub fn current(&self) -> f64 {
        let remaining = self.total_steps.saturating_sub(self.step) as f64;
        self.base_lr * remaining / self.total_steps as f64
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }
}
