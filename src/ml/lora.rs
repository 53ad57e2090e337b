// ============================================================
// Layer 5 - Low-Rank Adapted Linear Layer
// ============================================================
//   y = W x + b + (alpha / r) * B(A(dropout(x)))
//
// W, b are the pretrained projection and stay frozen. A (d_in→r)
// starts random, B (r→d_out) starts at zero, so an untrained
// adapter leaves the pretrained function unchanged.
//
// Reference: Hu et al. (2021) LoRA

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    prelude::*,
};

#[derive(Config, Debug)]
pub struct LoraConfig {
    /// Rank r of the update
    #[config(default = 8)]
    pub rank: usize,
    /// Scaling numerator; the update is multiplied by alpha / r
    #[config(default = 32.0)]
    pub alpha: f64,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl LoraConfig {
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank.max(1) as f64
    }

    pub fn init_linear<B: Backend>(
        &self,
        d_input:  usize,
        d_output: usize,
        device:   &B::Device,
    ) -> LoraLinear<B> {
        LoraLinear {
            base: LinearConfig::new(d_input, d_output).init(device),
            lora_a: LinearConfig::new(d_input, self.rank)
                .with_bias(false)
                .init(device),
            lora_b: LinearConfig::new(self.rank, d_output)
                .with_bias(false)
                .with_initializer(Initializer::Zeros)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            scaling: self.scaling(),
        }
    }
}

#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub base:    Linear<B>,
    pub lora_a:  Linear<B>,
    pub lora_b:  Linear<B>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraLinear<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let update = self.lora_b.forward(self.lora_a.forward(self.dropout.forward(x.clone())));
        self.base.forward(x) + update.mul_scalar(self.scaling)
    }

    /// Stop tracking gradients for the pretrained projection only.
    pub fn freeze_base(self) -> Self {
        Self { base: self.base.no_grad(), ..self }
    }

    pub fn without_dropout(self) -> Self {
        Self { dropout: DropoutConfig::new(0.0).init(), ..self }
    }
}
