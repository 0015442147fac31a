use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use examkb_core::error::{Error, Result};
use examkb_core::traits::{EmbeddingProvider, VectorIndex};
use examkb_core::types::{Candidate, EmbeddingVector, KnowledgeEntry};

use crate::rank_candidates;

/// Brute-force in-process index. Same contract as the Lance one, nothing persisted.
pub struct MemoryVectorIndex {
	entries: RwLock<IndexMap<String, (KnowledgeEntry, EmbeddingVector)>>,
	provider: Arc<dyn EmbeddingProvider>,
}

impl MemoryVectorIndex {
	pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
		Self { entries: RwLock::new(IndexMap::new()), provider }
	}
}

/// `1 - cos(a, b)`; a zero vector is treated as orthogonal to everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if na == 0.0 || nb == 0.0 {
		return 1.0;
	}
	1.0 - dot / (na * nb)
}

impl VectorIndex for MemoryVectorIndex {
	fn get(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>> {
		let entries = self.entries.read();
		Ok(ids.iter().filter_map(|id| entries.get(id).map(|(e, _)| e.clone())).collect())
	}

	fn upsert(&self, batch: &[KnowledgeEntry]) -> Result<usize> {
		let fresh: Vec<&KnowledgeEntry> = {
			let entries = self.entries.read();
			batch.iter().filter(|e| !entries.contains_key(&e.id)).collect()
		};
		if fresh.is_empty() { return Ok(0); }
		let texts: Vec<String> = fresh.iter().map(|e| e.document_text.clone()).collect();
		let vectors = self.provider.embed(&texts)?;
		if vectors.len() != fresh.len() {
			return Err(Error::EmbeddingAlignment {
				chunk: 0,
				expected: fresh.len(),
				missing: (vectors.len().min(fresh.len())..fresh.len()).collect(),
			});
		}
		let mut entries = self.entries.write();
		let mut written = 0;
		for (entry, vector) in fresh.into_iter().zip(vectors) {
			if !entries.contains_key(&entry.id) {
				entries.insert(entry.id.clone(), (entry.clone(), vector));
				written += 1;
			}
		}
		Ok(written)
	}

	fn query(&self, query_text: &str, k: usize) -> Result<Vec<Candidate>> {
		if k == 0 || self.entries.read().is_empty() { return Ok(Vec::new()); }
		let q = self
			.provider
			.embed(&[query_text.to_string()])?
			.pop()
			.ok_or_else(|| Error::EmbeddingAlignment { chunk: 0, expected: 1, missing: vec![0] })?;
		let scored = self
			.entries
			.read()
			.values()
			.map(|(e, v)| (e.clone(), cosine_distance(&q, v)))
			.collect();
		Ok(rank_candidates(scored, k))
	}

	fn count(&self) -> Result<usize> { Ok(self.entries.read().len()) }

	fn scan(&self, offset: usize, limit: usize) -> Result<Vec<KnowledgeEntry>> {
		Ok(self.entries.read().values().skip(offset).take(limit).map(|(e, _)| e.clone()).collect())
	}
}
