//! Two-stage question retrieval: vector recall, then cross-encoder rerank.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use examkb_core::error::{Error, Result};
use examkb_core::traits::{Reranker, VectorIndex};
use examkb_core::types::{Candidate, Metadata, RerankedResult};

pub const DEFAULT_TOP_K: usize = 5;
/// Recall depth cap; the cross-encoder cost grows linearly with it.
pub const MAX_INITIAL_K: usize = 30;
const OVERFETCH: usize = 5;

/// Candidates to recall before reranking down to `top_k`.
pub fn initial_k(top_k: usize) -> usize {
    top_k.saturating_mul(OVERFETCH).min(MAX_INITIAL_K)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize { DEFAULT_TOP_K }

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self { Self { query: query.into(), top_k: DEFAULT_TOP_K } }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidRequest("top_k must be a positive integer".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub distance: f32,
    pub original_rank: usize,
}

impl From<Candidate> for SearchHit {
    fn from(c: Candidate) -> Self {
        Self { id: c.entry.id, content: c.entry.document_text, metadata: c.entry.metadata, distance: c.distance, original_rank: c.original_rank }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub provider: String,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankedHit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub distance: f32,
    pub original_rank: usize,
    pub rerank_score: f32,
    pub final_rank: usize,
}

impl From<RerankedResult> for RerankedHit {
    fn from(r: RerankedResult) -> Self {
        Self {
            id: r.entry.id,
            content: r.entry.document_text,
            metadata: r.entry.metadata,
            distance: r.distance,
            original_rank: r.original_rank,
            rerank_score: r.rerank_score,
            final_rank: r.final_rank,
        }
    }
}

/// Reranked answer. An empty recall carries neither provider nor strategy.
#[derive(Debug, Clone, Serialize)]
pub struct RerankSearchResponse {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_strategy: Option<String>,
    pub results: Vec<RerankedHit>,
}

/// Vector recall only. Answers plain searches without any reranker.
pub struct Recall<I: ?Sized> {
    index: Arc<I>,
    provider: String,
}

impl<I: VectorIndex + ?Sized> Recall<I> {
    pub fn new(index: Arc<I>, provider: impl Into<String>) -> Self {
        Self { index, provider: provider.into() }
    }

    /// Plain nearest-neighbour search, ascending distance.
    pub fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        req.validate()?;
        let candidates = self.index.query(&req.query, req.top_k)?;
        Ok(SearchResponse {
            query: req.query.clone(),
            provider: self.provider.clone(),
            results: candidates.into_iter().map(SearchHit::from).collect(),
        })
    }
}

/// Recall followed by reranking.
pub struct Retriever<I: ?Sized, R: ?Sized> {
    recall: Recall<I>,
    reranker: Arc<R>,
}

impl<I, R> Retriever<I, R>
where
    I: VectorIndex + ?Sized,
    R: Reranker + ?Sized,
{
    pub fn new(index: Arc<I>, reranker: Arc<R>, provider: impl Into<String>) -> Self {
        Self { recall: Recall::new(index, provider), reranker }
    }

    /// Same as [`Recall::search`]; the reranker is not consulted.
    pub fn search(&self, req: &SearchRequest) -> Result<SearchResponse> { self.recall.search(req) }

    /// Recall `initial_k` candidates, score each against the query and keep the
    /// best `top_k` by score.
    pub fn search_with_rerank(&self, req: &SearchRequest) -> Result<RerankSearchResponse> {
        req.validate()?;
        let start = Instant::now();
        let recall_k = initial_k(req.top_k);
        let candidates = self.recall.index.query(&req.query, recall_k)?;
        debug!(recall_k, recalled = candidates.len(), "recall done");
        if candidates.is_empty() {
            return Ok(RerankSearchResponse { query: req.query.clone(), provider: None, rerank_strategy: None, results: Vec::new() });
        }

        let docs: Vec<String> = candidates.iter().map(|c| c.entry.document_text.clone()).collect();
        let scores = self.reranker.score(&req.query, &docs)?;
        let ranked = rank_by_score(candidates, &scores, req.top_k)?;
        info!(
            top_k = req.top_k,
            recalled = docs.len(),
            returned = ranked.len(),
            ms = start.elapsed().as_millis() as u64,
            "rerank search"
        );
        Ok(RerankSearchResponse {
            query: req.query.clone(),
            provider: Some(self.recall.provider.clone()),
            rerank_strategy: Some(self.reranker.strategy().to_string()),
            results: ranked.into_iter().map(RerankedHit::from).collect(),
        })
    }
}

/// Attach scores, stable-sort by descending score, keep `top_k`, number 1..n.
///
/// Fails when the score list does not line up with the candidates or holds a
/// value outside `[0, 1]`.
pub fn rank_by_score(candidates: Vec<Candidate>, scores: &[f32], top_k: usize) -> Result<Vec<RerankedResult>> {
    if scores.len() != candidates.len() {
        return Err(Error::Rerank(format!("got {} scores for {} candidates", scores.len(), candidates.len())));
    }
    if let Some((i, s)) = scores.iter().enumerate().find(|(_, s)| !s.is_finite() || !(0.0..=1.0).contains(*s)) {
        return Err(Error::Rerank(format!("score {s} for candidate {i} is outside [0, 1]")));
    }
    let mut scored: Vec<(Candidate, f32)> = candidates.into_iter().zip(scores.iter().copied()).collect();
    // sort_by is stable: equal scores keep recall order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, (c, rerank_score))| RerankedResult {
            entry: c.entry,
            distance: c.distance,
            original_rank: c.original_rank,
            rerank_score,
            final_rank: i + 1,
        })
        .collect())
}
