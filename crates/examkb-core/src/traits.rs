use std::collections::HashSet;

use crate::error::Result;
use crate::types::{Candidate, EmbeddingVector, KnowledgeEntry};

pub trait EmbeddingProvider: Send + Sync {
    /// Provider label reported in search responses (e.g. `dashscope`).
    fn name(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// One vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;
}

pub trait VectorIndex: Send + Sync {
    /// Stored entries for the requested ids, in one round trip. Absent ids are omitted.
    fn get(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>>;

    fn exists(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() { return Ok(HashSet::new()); }
        Ok(self.get(ids)?.into_iter().map(|e| e.id).collect())
    }

    /// Embeds and inserts entries whose id is absent. Present ids are left untouched.
    /// Returns the number of entries written.
    fn upsert(&self, entries: &[KnowledgeEntry]) -> Result<usize>;

    /// Up to `k` nearest entries, ascending by distance, repeatable within a process.
    fn query(&self, query_text: &str, k: usize) -> Result<Vec<Candidate>>;

    fn count(&self) -> Result<usize>;

    /// Page through stored entries in a stable order.
    fn scan(&self, offset: usize, limit: usize) -> Result<Vec<KnowledgeEntry>>;
}

pub trait Reranker: Send + Sync {
    fn strategy(&self) -> &str { "cross-encoder" }
    /// Relevance in `[0, 1]` for each candidate, index-aligned.
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}
