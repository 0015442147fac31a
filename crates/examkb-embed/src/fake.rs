use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use examkb_core::error::Result;
use examkb_core::traits::EmbeddingProvider;
use examkb_core::types::EmbeddingVector;

/// Deterministic bag-of-tokens vectors for tests and offline development.
/// Texts sharing tokens land close together; output is L2-normalised.
pub struct FakeProvider {
    dim: usize,
}

impl FakeProvider {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    fn embed_one(&self, text: &str) -> EmbeddingVector {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl EmbeddingProvider for FakeProvider {
    fn name(&self) -> &str { "fake" }
    fn dim(&self) -> usize { self.dim }
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
