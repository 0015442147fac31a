//! In-process BGE-M3 (XLM-RoBERTa) embedding backend on candle.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use examkb_core::config::{expand_path, LocalModelSettings};
use examkb_core::error::{Error, Result as CoreResult};
use examkb_core::traits::EmbeddingProvider;
use examkb_core::types::EmbeddingVector;

use crate::batch::embed_chunked;
use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const NAME: &str = "local";
const XLM_ROBERTA_PAD_ID: u32 = 1;

pub struct LocalProvider {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    batch_size: usize,
}

impl LocalProvider {
    pub fn new(settings: &LocalModelSettings) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let dim = config.hidden_size;
        let vb = load_weights(&model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(dim, "BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device, dim, max_len: settings.max_len.max(1), batch_size: settings.batch_size.max(1) })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, XLM_ROBERTA_PAD_ID, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        if start.elapsed().as_millis() > 100 * texts.len() as u128 {
            warn!(batch = texts.len(), ms = start.elapsed().as_millis() as u64, "slow embedding batch");
        }
        Ok(vectors)
    }
}

impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str { NAME }
    fn dim(&self) -> usize { self.dim }
    fn embed(&self, texts: &[String]) -> CoreResult<Vec<EmbeddingVector>> {
        embed_chunked(texts, self.batch_size, |chunk, batch| {
            self.embed_chunk(batch).map_err(|e| Error::EmbeddingProvider {
                provider: NAME.to_string(),
                chunk,
                message: e.to_string(),
            })
        })
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the weights file is mapped read-only and not modified while the model lives.
        return Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device)? });
    }
    let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, DType::F32, device))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(["APP_MODEL_DIR", "MODEL_DIR"].iter().filter_map(|var| std::env::var(var).ok()).map(PathBuf::from))
        .chain([PathBuf::from("../models/bge-m3"), PathBuf::from("models/bge-m3")]);
    for dir in candidates {
        if dir.exists() { return Ok(dir); }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
