//! Qwen3 decoder stack for batched scoring.
//!
//! Loads the same checkpoint layout as `candle_transformers::models::qwen3`, but
//! runs a whole right-padded batch in one pass with a per-row padding mask and
//! keeps no KV cache. Only the `yes`/`no` rows of the LM head are kept.

use std::sync::Arc;

use candle_core::{bail, DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{embedding, linear_b, linear_no_bias, rms_norm, Activation, Embedding, Linear, RmsNorm, VarBuilder};
use candle_transformers::models::qwen3::Config;
use candle_transformers::utils::repeat_kv;

struct Rotary {
    sin: Tensor,
    cos: Tensor,
}

impl Rotary {
    fn new(cfg: &Config, dtype: DType, dev: &Device) -> Result<Self> {
        let dim = cfg.head_dim;
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1f32 / cfg.rope_theta.powf(i as f64 / dim as f64) as f32)
            .collect();
        let half = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half), dev)?;
        let positions = Tensor::arange(0u32, cfg.max_position_embeddings as u32, dev)?
            .to_dtype(DType::F32)?
            .reshape((cfg.max_position_embeddings, 1))?;
        let freqs = positions.matmul(&inv_freq)?;
        Ok(Self { sin: freqs.sin()?.to_dtype(dtype)?, cos: freqs.cos()?.to_dtype(dtype)? })
    }

    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, len, _) = x.dims4()?;
        let cos = self.cos.narrow(0, 0, len)?;
        let sin = self.sin.narrow(0, 0, len)?;
        candle_nn::rotary_emb::rope(&x.contiguous()?, &cos, &sin)
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    q_norm: RmsNorm,
    k_norm: RmsNorm,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    rotary: Arc<Rotary>,
}

impl Attention {
    fn new(cfg: &Config, rotary: Arc<Rotary>, vb: VarBuilder) -> Result<Self> {
        let (h, d) = (cfg.hidden_size, cfg.head_dim);
        let bias = cfg.attention_bias;
        Ok(Self {
            q_proj: linear_b(h, cfg.num_attention_heads * d, bias, vb.pp("q_proj"))?,
            k_proj: linear_b(h, cfg.num_key_value_heads * d, bias, vb.pp("k_proj"))?,
            v_proj: linear_b(h, cfg.num_key_value_heads * d, bias, vb.pp("v_proj"))?,
            o_proj: linear_b(cfg.num_attention_heads * d, h, bias, vb.pp("o_proj"))?,
            q_norm: rms_norm(d, cfg.rms_norm_eps, vb.pp("q_norm"))?,
            k_norm: rms_norm(d, cfg.rms_norm_eps, vb.pp("k_norm"))?,
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.num_key_value_heads,
            head_dim: d,
            rotary,
        })
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, l, _) = x.dims3()?;
        let heads = |t: Tensor, n: usize| t.reshape((b, l, n, self.head_dim))?.transpose(1, 2)?.contiguous();
        let q = heads(self.q_proj.forward(x)?, self.num_heads)?.apply(&self.q_norm)?;
        let k = heads(self.k_proj.forward(x)?, self.num_kv_heads)?.apply(&self.k_norm)?;
        let v = heads(self.v_proj.forward(x)?, self.num_kv_heads)?;

        let q = self.rotary.apply(&q)?;
        let k = self.rotary.apply(&k)?;
        let groups = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, groups)?.contiguous()?;
        let v = repeat_kv(v, groups)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?)? * scale)?.broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, l, self.num_heads * self.head_dim))?
            .apply(&self.o_proj)
    }
}

struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    act: Activation,
}

impl Mlp {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(cfg.hidden_size, cfg.intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(cfg.hidden_size, cfg.intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(cfg.intermediate_size, cfg.hidden_size, vb.pp("down_proj"))?,
            act: cfg.hidden_act,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = x.apply(&self.gate_proj)?.apply(&self.act)?;
        (gate * x.apply(&self.up_proj)?)?.apply(&self.down_proj)
    }
}

struct Layer {
    attn: Attention,
    mlp: Mlp,
    ln1: RmsNorm,
    ln2: RmsNorm,
}

impl Layer {
    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let x = (x + self.attn.forward(&x.apply(&self.ln1)?, mask)?)?;
        let h = self.mlp.forward(&x.apply(&self.ln2)?)?;
        x + h
    }
}

pub struct Qwen3Decoder {
    embed_tokens: Embedding,
    layers: Vec<Layer>,
    norm: RmsNorm,
    /// LM head rows for the two answer tokens, `[2, hidden]` (yes first).
    answer_head: Tensor,
    device: Device,
    dtype: DType,
}

impl Qwen3Decoder {
    pub fn new(cfg: &Config, yes_id: u32, no_id: u32, vb: VarBuilder) -> Result<Self> {
        if cfg.use_sliding_window {
            bail!("sliding window attention is not supported");
        }
        let device = vb.device().clone();
        let dtype = vb.dtype();
        let embed_tokens = embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("model.embed_tokens"))?;
        let rotary = Arc::new(Rotary::new(cfg, dtype, &device)?);
        let vb_l = vb.pp("model.layers");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| {
                let vb = vb_l.pp(i);
                Ok(Layer {
                    attn: Attention::new(cfg, rotary.clone(), vb.pp("self_attn"))?,
                    mlp: Mlp::new(cfg, vb.pp("mlp"))?,
                    ln1: rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("input_layernorm"))?,
                    ln2: rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("post_attention_layernorm"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let norm = rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("model.norm"))?;

        let head = if cfg.tie_word_embeddings {
            embed_tokens.embeddings().clone()
        } else {
            vb.pp("lm_head").get((cfg.vocab_size, cfg.hidden_size), "weight")?
        };
        let rows = Tensor::new(&[yes_id, no_id], &device)?;
        let answer_head = head.index_select(&rows, 0)?;

        Ok(Self { embed_tokens, layers, norm, answer_head, device, dtype })
    }

    /// `(yes, no)` logits at the last real position of each row. `ids` is
    /// row-major `[lengths.len(), width]`, right-padded.
    pub fn answer_logits(&self, ids: &[u32], lengths: &[usize], width: usize) -> Result<Vec<(f32, f32)>> {
        let batch = lengths.len();
        if batch == 0 {
            return Ok(Vec::new());
        }
        if ids.len() != batch * width || lengths.iter().any(|&l| l == 0 || l > width) {
            bail!("malformed padded batch: {} ids for {batch} rows of width {width}", ids.len());
        }
        let input = Tensor::from_slice(ids, (batch, width), &self.device)?;
        let mask = Tensor::from_vec(causal_padding_mask(lengths, width), (batch, 1, width, width), &self.device)?
            .to_dtype(self.dtype)?;

        let mut h = self.embed_tokens.forward(&input)?;
        for layer in &self.layers {
            h = layer.forward(&h, &mask)?;
        }
        let h = h.apply(&self.norm)?;

        let last = lengths
            .iter()
            .enumerate()
            .map(|(row, &len)| h.i((row, len - 1)))
            .collect::<Result<Vec<_>>>()?;
        let last = Tensor::stack(&last, 0)?;
        let logits = last.matmul(&self.answer_head.t()?)?.to_dtype(DType::F32)?;
        let pairs = logits.to_vec2::<f32>()?;
        Ok(pairs.into_iter().map(|p| (p[0], p[1])).collect())
    }
}

/// Additive attention bias, `[rows, width, width]` flattened. A query may attend to
/// keys at or before itself that are inside its row's real length. Padding queries
/// always keep key 0 so no softmax row is fully masked.
pub fn causal_padding_mask(lengths: &[usize], width: usize) -> Vec<f32> {
    let mut mask = Vec::with_capacity(lengths.len() * width * width);
    for &len in lengths {
        for i in 0..width {
            mask.extend((0..width).map(|j| if j <= i && j < len.max(1) { 0.0 } else { f32::NEG_INFINITY }));
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_causal_within_real_tokens() {
        let m = causal_padding_mask(&[3, 1], 3);
        let row = |b: usize, i: usize| -> Vec<bool> { m[(b * 9 + i * 3)..(b * 9 + i * 3 + 3)].iter().map(|v| *v == 0.0).collect() };
        assert_eq!(row(0, 0), vec![true, false, false]);
        assert_eq!(row(0, 2), vec![true, true, true]);
        // second row has one real token; padded queries see only that token
        assert_eq!(row(1, 0), vec![true, false, false]);
        assert_eq!(row(1, 2), vec![true, false, false]);
    }

    #[test]
    fn answer_logits_match_between_batched_and_single_rows() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "vocab_size": 16, "hidden_size": 8, "intermediate_size": 16,
            "num_hidden_layers": 2, "num_attention_heads": 2, "head_dim": 4,
            "attention_bias": false, "num_key_value_heads": 1,
            "max_position_embeddings": 32, "sliding_window": null, "max_window_layers": 2,
            "tie_word_embeddings": true, "rope_theta": 10000.0, "rms_norm_eps": 1e-6,
            "use_sliding_window": false, "hidden_act": "silu"
        }))
        .expect("config");
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let decoder = Qwen3Decoder::new(&cfg, 3, 4, vb).expect("decoder");

        let long = [1u32, 5, 7, 2, 9];
        let short = [1u32, 6, 2];
        let mut padded = long.to_vec();
        padded.extend_from_slice(&short);
        padded.extend_from_slice(&[0, 0]);
        let batched = decoder.answer_logits(&padded, &[5, 3], 5).expect("batched");
        let alone_long = decoder.answer_logits(&long, &[5], 5).expect("long");
        let alone_short = decoder.answer_logits(&short, &[3], 3).expect("short");

        let close = |a: (f32, f32), b: (f32, f32)| (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4;
        assert!(close(batched[0], alone_long[0]), "{:?} vs {:?}", batched[0], alone_long[0]);
        assert!(close(batched[1], alone_short[0]), "{:?} vs {:?}", batched[1], alone_short[0]);
    }

    #[test]
    fn malformed_batch_is_an_error() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "vocab_size": 8, "hidden_size": 4, "intermediate_size": 8,
            "num_hidden_layers": 1, "num_attention_heads": 1, "head_dim": 4,
            "attention_bias": false, "num_key_value_heads": 1,
            "max_position_embeddings": 8, "sliding_window": null, "max_window_layers": 1,
            "tie_word_embeddings": false, "rope_theta": 10000.0, "rms_norm_eps": 1e-6,
            "use_sliding_window": false, "hidden_act": "silu"
        }))
        .expect("config");
        let varmap = candle_nn::VarMap::new();
        let decoder = Qwen3Decoder::new(&cfg, 1, 2, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu)).expect("decoder");
        assert!(decoder.answer_logits(&[1, 2, 3], &[2, 2], 2).is_err());
        assert!(decoder.answer_logits(&[], &[], 4).expect("empty").is_empty());
    }
}
