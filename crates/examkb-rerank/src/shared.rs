use std::sync::Arc;
use std::thread::JoinHandle;

use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use examkb_core::error::{Error, Result};
use examkb_core::traits::Reranker;

/// A pairwise relevance model: one score per document, in input order.
pub trait PairScorer: Send + Sync {
    const STRATEGY: &'static str;

    fn score_pairs(&self, query: &str, docs: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Process-wide handle to a scorer that is built at most once.
///
/// Cloning shares the same underlying model. Until initialisation has finished,
/// `score` fails fast with [`Error::RerankerNotReady`] instead of blocking.
pub struct SharedCrossEncoder<S> {
    cell: Arc<OnceCell<S>>,
    load_error: Arc<OnceCell<String>>,
}

impl<S> Clone for SharedCrossEncoder<S> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell), load_error: Arc::clone(&self.load_error) }
    }
}

impl<S> Default for SharedCrossEncoder<S> {
    fn default() -> Self { Self::new() }
}

impl<S> SharedCrossEncoder<S> {
    pub fn new() -> Self {
        Self { cell: Arc::new(OnceCell::new()), load_error: Arc::new(OnceCell::new()) }
    }

    pub fn ready(scorer: S) -> Self {
        Self { cell: Arc::new(OnceCell::with_value(scorer)), load_error: Arc::new(OnceCell::new()) }
    }

    pub fn is_ready(&self) -> bool { self.cell.get().is_some() }

    /// Build the scorer unless another caller already did. Concurrent callers
    /// block on the first one; the loader runs at most once successfully.
    pub fn init<F>(&self, loader: F) -> Result<&S>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        self.cell.get_or_try_init(loader).map_err(|e| {
            let message = format!("reranker failed to load: {e:#}");
            let _ = self.load_error.set(message.clone());
            Error::Rerank(message)
        })
    }
}

impl<S: Send + Sync + 'static> SharedCrossEncoder<S> {
    /// Load on a background thread so callers can start serving plain search.
    pub fn spawn_load<F>(&self, loader: F) -> JoinHandle<()>
    where
        F: FnOnce() -> anyhow::Result<S> + Send + 'static,
    {
        let this = self.clone();
        std::thread::spawn(move || match this.init(loader) {
            Ok(_) => info!("reranker ready"),
            Err(e) => error!(error = %e, "background reranker load failed"),
        })
    }
}

impl<S: PairScorer> Reranker for SharedCrossEncoder<S> {
    fn strategy(&self) -> &str { S::STRATEGY }

    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let Some(scorer) = self.cell.get() else {
            if let Some(message) = self.load_error.get() {
                return Err(Error::Rerank(message.clone()));
            }
            warn!("rerank requested before the model finished loading");
            return Err(Error::RerankerNotReady);
        };
        let scores = scorer.score_pairs(query, candidates).map_err(|e| Error::Rerank(format!("{e:#}")))?;
        if scores.len() != candidates.len() {
            return Err(Error::Rerank(format!("scorer returned {} scores for {} candidates", scores.len(), candidates.len())));
        }
        Ok(scores)
    }
}
