use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, softmax},
};

use crate::ml::lora::{LoraConfig, LoraLinear};

/// Additive attention bias for masked positions. Large enough to
/// zero the softmax weight, small enough to stay finite in f16.
const MASK_VALUE: f64 = -1.0e4;

// ─── Seam to the training core ───────────────────────────────────────────────
/// What the adversarial loop needs from a causal LM: the token
/// embedding lookup, and a forward pass that can start from
/// precomputed (perturbed) embeddings.
pub trait LanguageModel<B: Backend> {
    /// input_ids: [batch, seq] → embeddings: [batch, seq, d_model]
    fn embed(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3>;

    /// embeddings: [batch, seq, d_model] → logits: [batch, seq, vocab]
    fn forward_embeds(
        &self,
        embeds:         Tensor<B, 3>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3>;

    fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        self.forward_embeds(self.embed(input_ids), attention_mask)
    }

    /// Copy with every dropout layer disabled, for probe passes that
    /// must be repeatable.
    fn without_dropout(&self) -> Self
    where
        Self: Sized;
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
    pub lora:        LoraConfig,
}

impl CausalLmConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            return Err(format!(
                "d_model ({}) must be a positive multiple of num_heads ({})",
                self.d_model, self.num_heads
            ));
        }
        if self.lora.rank == 0 {
            return Err("lora rank must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.dropout) || !(0.0..1.0).contains(&self.lora.dropout) {
            return Err("dropout probabilities must lie in [0, 1)".into());
        }
        Ok(())
    }

    /// Build the model with pretrained parts frozen and only the
    /// low-rank adapters trainable.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LoraCausalLm<B> {
        let wte    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let wpe    = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let blocks = (0..self.num_layers)
            .map(|_| self.build_block(device))
            .collect();
        let ln_f    = LayerNormConfig::new(self.d_model).init(device);
        let lm_head = LinearConfig::new(self.d_model, self.vocab_size)
            .with_bias(false)
            .init(device);
        let drop    = DropoutConfig::new(self.dropout).init();

        LoraCausalLm { wte, wpe, drop, blocks, ln_f, lm_head, num_heads: self.num_heads }
            .freeze_pretrained()
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let attn = CausalSelfAttention {
            c_attn:    LinearConfig::new(self.d_model, 3 * self.d_model).init(device),
            c_proj:    self.lora.init_linear(self.d_model, self.d_model, device),
            attn_drop: DropoutConfig::new(self.dropout).init(),
            num_heads: self.num_heads,
        };
        let mlp = Mlp {
            c_fc:   LinearConfig::new(self.d_model, self.d_ff).init(device),
            c_proj: self.lora.init_linear(self.d_ff, self.d_model, device),
            drop:   DropoutConfig::new(self.dropout).init(),
        };
        DecoderBlock {
            ln_1: LayerNormConfig::new(self.d_model).init(device),
            attn,
            ln_2: LayerNormConfig::new(self.d_model).init(device),
            mlp,
        }
    }
}

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    pub c_attn:    Linear<B>,
    pub c_proj:    LoraLinear<B>,
    pub attn_drop: Dropout,
    pub num_heads: usize,
}

impl<B: Backend> CausalSelfAttention<B> {
    /// x: [batch, seq, d_model], bias: [batch, 1, seq, seq]
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq, d_model] = x.dims();
        let heads  = self.num_heads;
        let d_head = d_model / heads;

        let qkv = self.c_attn.forward(x); // [batch, seq, 3 * d_model]
        let split = |t: Tensor<B, 3>| t.reshape([batch, seq, heads, d_head]).swap_dims(1, 2);
        let q = split(qkv.clone().slice([0..batch, 0..seq, 0..d_model]));
        let k = split(qkv.clone().slice([0..batch, 0..seq, d_model..2 * d_model]));
        let v = split(qkv.slice([0..batch, 0..seq, 2 * d_model..3 * d_model]));

        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((d_head as f64).sqrt())
            + bias.expand([batch, heads, seq, seq]);
        let weights = self.attn_drop.forward(softmax(scores, 3));

        let context = weights
            .matmul(v)              // [batch, heads, seq, d_head]
            .swap_dims(1, 2)
            .reshape([batch, seq, d_model]);
        self.c_proj.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub c_fc:   Linear<B>,
    pub c_proj: LoraLinear<B>,
    pub drop:   Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.drop.forward(self.c_proj.forward(gelu(self.c_fc.forward(x))))
    }
}

/// Pre-norm GPT-2 style decoder block.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub ln_1: LayerNorm<B>,
    pub attn: CausalSelfAttention<B>,
    pub ln_2: LayerNorm<B>,
    pub mlp:  Mlp<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.ln_1.forward(x), bias);
        x.clone() + self.mlp.forward(self.ln_2.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct LoraCausalLm<B: Backend> {
    pub wte:       Embedding<B>,
    pub wpe:       Embedding<B>,
    pub drop:      Dropout,
    pub blocks:    Vec<DecoderBlock<B>>,
    pub ln_f:      LayerNorm<B>,
    pub lm_head:   Linear<B>,
    pub num_heads: usize,
}

impl<B: Backend> LoraCausalLm<B> {
    /// Mark every pretrained weight as constant. Called after init
    /// and again after loading a record, since a record carries no
    /// gradient flags.
    pub fn freeze_pretrained(self) -> Self {
        let blocks = self
            .blocks
            .into_iter()
            .map(|block| DecoderBlock {
                ln_1: block.ln_1.no_grad(),
                attn: CausalSelfAttention {
                    c_attn: block.attn.c_attn.no_grad(),
                    c_proj: block.attn.c_proj.freeze_base(),
                    ..block.attn
                },
                ln_2: block.ln_2.no_grad(),
                mlp: Mlp {
                    c_fc:   block.mlp.c_fc.no_grad(),
                    c_proj: block.mlp.c_proj.freeze_base(),
                    ..block.mlp
                },
            })
            .collect();

        Self {
            wte:     self.wte.no_grad(),
            wpe:     self.wpe.no_grad(),
            blocks,
            ln_f:    self.ln_f.no_grad(),
            lm_head: self.lm_head.no_grad(),
            ..self
        }
    }

    /// Number of scalars in the low-rank adapters.
    pub fn adapter_params(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| {
                b.attn.c_proj.lora_a.num_params()
                    + b.attn.c_proj.lora_b.num_params()
                    + b.mlp.c_proj.lora_a.num_params()
                    + b.mlp.c_proj.lora_b.num_params()
            })
            .sum()
    }

    fn max_positions(&self) -> usize {
        self.wpe.weight.dims()[0]
    }
}

/// [batch, 1, seq, seq] additive bias: MASK_VALUE where the key is
/// in the future or is padding, 0 elsewhere.
fn attention_bias<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 4> {
    let [batch, seq] = attention_mask.dims();
    let device = attention_mask.device();

    let future: Vec<f32> = (0..seq)
        .flat_map(|i| (0..seq).map(move |j| if j > i { 1.0 } else { 0.0 }))
        .collect();
    let future = Tensor::<B, 1>::from_floats(future.as_slice(), &device)
        .reshape([1, 1, seq, seq])
        .expand([batch, 1, seq, seq]);

    let padding = attention_mask
        .float()
        .neg()
        .add_scalar(1.0)
        .reshape([batch, 1, 1, seq])
        .expand([batch, 1, seq, seq]);

    (future + padding).clamp_max(1.0).mul_scalar(MASK_VALUE)
}

impl<B: Backend> LanguageModel<B> for LoraCausalLm<B> {
    fn embed(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.wte.forward(input_ids)
    }

    fn forward_embeds(
        &self,
        embeds:         Tensor<B, 3>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let [batch, seq, _] = embeds.dims();
        debug_assert!(seq <= self.max_positions());

        // Positions are added here, after any perturbation of the token embeddings.
        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &embeds.device())
            .unsqueeze::<2>()
            .expand([batch, seq]);
        let pos_emb = self.wpe.forward(positions);

        let bias  = attention_bias(attention_mask);
        let mut x = self.drop.forward(embeds + pos_emb);
        for block in &self.blocks {
            x = block.forward(x, bias.clone());
        }
        self.lm_head.forward(self.ln_f.forward(x))
    }

    fn without_dropout(&self) -> Self {
        let off = || DropoutConfig::new(0.0).init();
        let blocks = self
            .blocks
            .iter()
            .cloned()
            .map(|block| DecoderBlock {
                attn: CausalSelfAttention {
                    c_proj:    block.attn.c_proj.without_dropout(),
                    attn_drop: off(),
                    ..block.attn
                },
                mlp: Mlp {
                    c_proj: block.mlp.c_proj.without_dropout(),
                    drop:   off(),
                    ..block.mlp
                },
                ..block
            })
            .collect();

        Self { drop: off(), blocks, ..self.clone() }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    pub(crate) type TB = NdArray;
    pub(crate) type AB = Autodiff<NdArray>;

    pub(crate) fn tiny_config() -> CausalLmConfig {
        CausalLmConfig::new(32, 8, 16, 2, 1, 32, LoraConfig::new().with_rank(4).with_dropout(0.0))
            .with_dropout(0.0)
    }

    #[test]
    fn test_logits_shape() {
        let device = Default::default();
        let model: LoraCausalLm<TB> = tiny_config().init(&device);
        let ids  = Tensor::<TB, 2, Int>::from_ints([[1, 2, 3, 4], [5, 6, 0, 0]], &device);
        let mask = Tensor::<TB, 2, Int>::from_ints([[1, 1, 1, 1], [1, 1, 0, 0]], &device);
        assert_eq!(model.forward(ids, mask).dims(), [2, 4, 32]);
    }

    #[test]
    fn test_future_tokens_do_not_leak() {
        let device = Default::default();
        let model: LoraCausalLm<TB> = tiny_config().init(&device);
        let mask = Tensor::<TB, 2, Int>::ones([1, 4], &device);
        let a = model.forward(Tensor::from_ints([[1, 2, 3, 4]], &device), mask.clone());
        let b = model.forward(Tensor::from_ints([[1, 2, 9, 9]], &device), mask);

        // positions 0 and 1 cannot see tokens 2 and 3
        let diff: f32 = (a.slice([0..1, 0..2, 0..32]) - b.slice([0..1, 0..2, 0..32]))
            .abs()
            .max()
            .into_scalar()
            .elem::<f32>();
        assert!(diff < 1e-5, "causal mask leaked future tokens: {diff}");
    }

    #[test]
    fn test_only_adapters_receive_gradients() {
        let device = Default::default();
        let model: LoraCausalLm<AB> = tiny_config().init(&device);
        let ids  = Tensor::<AB, 2, Int>::from_ints([[1, 2, 3, 4]], &device);
        let mask = Tensor::<AB, 2, Int>::ones([1, 4], &device);

        let grads = model.forward(ids, mask).sum().backward();
        assert!(model.wte.weight.val().grad(&grads).is_none());
        assert!(model.lm_head.weight.val().grad(&grads).is_none());
        assert!(model.blocks[0].mlp.c_proj.lora_b.weight.val().grad(&grads).is_some());
        assert!(model.adapter_params() > 0);
        assert!(model.adapter_params() < model.num_params());
    }

    #[test]
    fn test_without_dropout_is_repeatable() {
        let device = Default::default();
        let config = CausalLmConfig::new(32, 8, 16, 2, 1, 32, LoraConfig::new().with_rank(4))
            .with_dropout(0.5);
        let model: LoraCausalLm<AB> = config.init::<AB>(&device).without_dropout();
        let ids  = Tensor::<AB, 2, Int>::from_ints([[1, 2, 3, 4]], &device);
        let mask = Tensor::<AB, 2, Int>::ones([1, 4], &device);

        let a = model.forward(ids.clone(), mask.clone());
        let b = model.forward(ids, mask);
        let diff: f32 = (a - b).abs().max().into_scalar().elem::<f32>();
        assert_eq!(diff, 0.0);
    }
}
