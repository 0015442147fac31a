//! Qwen3-Reranker cross-encoder on candle.
//!
//! Each (query, document) pair is rendered with [`PromptTemplate`]. All pairs of a
//! request are right-padded into one batch, run through [`Qwen3Decoder`] in a single
//! pass, and scored from the `yes`/`no` logits at each row's last real token.

use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen3::Config as Qwen3Config;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use examkb_core::config::{expand_path, RerankSettings};
use examkb_embed::device::select_device;

use crate::decoder::Qwen3Decoder;
use crate::prompt::{fit_to_budget, pad_right, PromptTemplate};
use crate::score::yes_probability;
use crate::shared::PairScorer;

pub struct Qwen3CrossEncoder {
    model: Qwen3Decoder,
    tokenizer: Tokenizer,
    template: PromptTemplate,
    pad_id: u32,
    max_length: usize,
}

impl Qwen3CrossEncoder {
    pub fn load(settings: &RerankSettings) -> Result<Self> {
        let start = Instant::now();
        let device = select_device();
        let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
        info!(dir = %model_dir.display(), "loading Qwen3 reranker");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let yes_id = answer_token(&tokenizer, "yes")?;
        let no_id = answer_token(&tokenizer, "no")?;
        let pad_id = tokenizer
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .unwrap_or(0);

        let config: Qwen3Config = serde_json::from_str(
            &std::fs::read_to_string(model_dir.join("config.json")).context("reading reranker config.json")?,
        )?;
        let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };
        let vb = load_weights(&model_dir, dtype, &device)?;
        let model = Qwen3Decoder::new(&config, yes_id, no_id, vb)?;
        info!(yes_id, no_id, ms = start.elapsed().as_millis() as u64, "Qwen3 reranker loaded");

        Ok(Self {
            model,
            tokenizer,
            template: PromptTemplate::with_instruction(settings.instruction.as_deref()),
            pad_id,
            max_length: settings.max_length.max(1),
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self.tokenizer.encode(text, false).map_err(|e| anyhow!("tokenize failed: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    /// Token ids for every pair, truncated on the document side only.
    fn build_inputs(&self, query: &str, docs: &[String]) -> Result<Vec<Vec<u32>>> {
        let head = self.encode(&self.template.head(query))?;
        let tail = self.encode(self.template.tail())?;
        let encodings = self
            .tokenizer
            .encode_batch(docs.to_vec(), false)
            .map_err(|e| anyhow!("tokenize failed: {e}"))?;
        Ok(encodings.iter().map(|enc| fit_to_budget(&head, enc.get_ids(), &tail, self.max_length)).collect())
    }
}

impl PairScorer for Qwen3CrossEncoder {
    const STRATEGY: &'static str = "cross-encoder";

    fn score_pairs(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let inputs = self.build_inputs(query, docs)?;
        let (ids, lengths, width) = pad_right(&inputs, self.pad_id);
        let logits = self.model.answer_logits(&ids, &lengths, width)?;
        let scores = logits.into_iter().map(|(yes, no)| yes_probability(yes, no)).collect();
        debug!(pairs = docs.len(), width, ms = start.elapsed().as_millis() as u64, "cross-encoder scored");
        Ok(scores)
    }
}

fn answer_token(tokenizer: &Tokenizer, word: &str) -> Result<u32> {
    if let Some(id) = tokenizer.token_to_id(word) {
        return Ok(id);
    }
    let enc = tokenizer.encode(word, false).map_err(|e| anyhow!("tokenize '{word}' failed: {e}"))?;
    enc.get_ids().first().copied().ok_or_else(|| anyhow!("tokenizer has no id for '{word}'"))
}

fn load_weights(model_dir: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let single = model_dir.join("model.safetensors");
    let index = model_dir.join("model.safetensors.index.json");
    let files = if single.exists() {
        vec![single]
    } else if index.exists() {
        sharded_files(model_dir, &index)?
    } else {
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        return Ok(VarBuilder::from_tensors(weights_map, dtype, device));
    };
    // SAFETY: the weight files are mapped read-only and not modified while the model lives.
    Ok(unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? })
}

fn sharded_files(model_dir: &Path, index: &Path) -> Result<Vec<PathBuf>> {
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(index)?)?;
    let map = json
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| anyhow!("{} has no weight_map", index.display()))?;
    let shards: BTreeSet<&str> = map.values().filter_map(|v| v.as_str()).collect();
    Ok(shards.into_iter().map(|f| model_dir.join(f)).collect())
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(std::env::var("APP_RERANKER_DIR").ok().map(PathBuf::from))
        .chain([PathBuf::from("../models/qwen3-reranker"), PathBuf::from("models/qwen3-reranker")]);
    for dir in candidates {
        if dir.join("config.json").exists() { return Ok(dir); }
    }
    Err(anyhow!("Could not locate Qwen3 reranker model directory (set rerank.model_dir)"))
}
