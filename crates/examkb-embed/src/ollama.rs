use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use examkb_core::config::OllamaSettings;
use examkb_core::error::{Error, Result};
use examkb_core::traits::EmbeddingProvider;
use examkb_core::types::EmbeddingVector;

use crate::batch::{align_indexed, check_dims, embed_chunked};

const NAME: &str = "ollama";

/// Ollama `/api/embed` backend. The response is positional: one vector per input.
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OllamaProvider {
    pub fn new(settings: &OllamaSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build Ollama HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", settings.host.trim_end_matches('/')),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            batch_size: settings.batch_size.max(1),
        })
    }

    fn embed_chunk(&self, chunk: usize, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        let fail = |message: String| Error::EmbeddingProvider { provider: NAME.to_string(), chunk, message };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .map_err(|e| fail(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(fail(format!("HTTP {status}: {body}")));
        }
        let parsed: EmbedResponse = resp.json().map_err(|e| fail(format!("malformed response: {e}")))?;
        let vectors = align_indexed(chunk, texts.len(), parsed.embeddings.into_iter().enumerate())?;
        check_dims(NAME, chunk, self.dimensions, &vectors)?;
        Ok(vectors)
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str { NAME }
    fn dim(&self) -> usize { self.dimensions }
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        embed_chunked(texts, self.batch_size, |chunk, batch| self.embed_chunk(chunk, batch))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<EmbeddingVector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let settings = OllamaSettings { host: "http://gpu-box:11434/".into(), ..Default::default() };
        let provider = OllamaProvider::new(&settings).expect("provider");
        assert_eq!(provider.endpoint, "http://gpu-box:11434/api/embed");
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn empty_input_makes_no_request() {
        // nothing listens on port 9; an attempted request would fail
        let settings = OllamaSettings { host: "http://127.0.0.1:9".into(), ..Default::default() };
        let provider = OllamaProvider::new(&settings).expect("provider");
        assert!(provider.embed(&[]).expect("empty").is_empty());
    }
}
