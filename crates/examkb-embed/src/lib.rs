//! Embedding Provider backends.
//!
//! The backend is picked once from [`ProviderKind`] by [`build_provider`] and
//! handed around as `Arc<dyn EmbeddingProvider>`; nothing downstream looks at
//! the provider tag again.

use std::sync::Arc;
use tracing::info;

use examkb_core::config::{EmbeddingSettings, ProviderKind};
use examkb_core::error::{Error, Result};
use examkb_core::traits::EmbeddingProvider;

pub mod batch;
pub mod dashscope;
pub mod device;
pub mod fake;
pub mod local;
pub mod ollama;
pub mod pool;
pub mod tokenize;

pub use dashscope::DashScopeProvider;
pub use fake::FakeProvider;
pub use local::LocalProvider;
pub use ollama::OllamaProvider;
pub use pool::masked_mean_l2;

pub const FAKE_DIM: usize = 1024;

/// `APP_USE_FAKE_EMBEDDINGS=1` forces the fake backend regardless of configuration.
pub fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn build_provider(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    let kind = if fake_embeddings_forced() { ProviderKind::Fake } else { settings.provider };
    info!(provider = kind.as_str(), "selecting embedding provider");
    let provider: Arc<dyn EmbeddingProvider> = match kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(&settings.ollama)?),
        ProviderKind::DashScope => Arc::new(DashScopeProvider::new(&settings.dashscope)?),
        ProviderKind::Local => Arc::new(
            LocalProvider::new(&settings.local).map_err(|e| Error::InvalidConfig(format!("local embedding model: {e}")))?,
        ),
        ProviderKind::Fake => Arc::new(FakeProvider::new(FAKE_DIM)),
    };
    Ok(provider)
}
