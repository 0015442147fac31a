//! Second-stage relevance scoring.
//!
//! [`build_reranker`] turns [`RerankSettings`] into a shared [`Reranker`]:
//! the Qwen3 cross-encoder or the keyword-overlap fallback.

use std::sync::Arc;
use tracing::info;

use examkb_core::config::{RerankBackend, RerankSettings};
use examkb_core::error::Result;
use examkb_core::traits::Reranker;

pub mod decoder;
pub mod keyword;
pub mod prompt;
pub mod qwen3;
pub mod score;
pub mod shared;

pub use keyword::KeywordOverlapScorer;
pub use prompt::{fit_to_budget, pad_right, PromptTemplate};
pub use qwen3::Qwen3CrossEncoder;
pub use score::yes_probability;
pub use shared::{PairScorer, SharedCrossEncoder};

/// Build the configured reranker, loading model weights before returning.
pub fn build_reranker(settings: &RerankSettings) -> Result<Arc<dyn Reranker>> {
    info!(backend = ?settings.backend, "building reranker");
    let reranker: Arc<dyn Reranker> = match settings.backend {
        RerankBackend::Keyword => Arc::new(SharedCrossEncoder::ready(KeywordOverlapScorer)),
        RerankBackend::Qwen3 => {
            let shared = SharedCrossEncoder::new();
            shared.init(|| Qwen3CrossEncoder::load(settings))?;
            Arc::new(shared)
        }
    };
    Ok(reranker)
}

/// Like [`build_reranker`] but the model loads on a background thread; until it
/// is ready, scoring fails with `RerankerNotReady`.
pub fn spawn_reranker(settings: &RerankSettings) -> Arc<dyn Reranker> {
    let reranker: Arc<dyn Reranker> = match settings.backend {
        RerankBackend::Keyword => Arc::new(SharedCrossEncoder::ready(KeywordOverlapScorer)),
        RerankBackend::Qwen3 => {
            let shared = SharedCrossEncoder::new();
            let settings = settings.clone();
            let _ = shared.spawn_load(move || Qwen3CrossEncoder::load(&settings));
            Arc::new(shared)
        }
    };
    reranker
}
