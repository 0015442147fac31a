//! DashScope text-embedding backend.
//!
//! The service accepts at most `batch_size` texts per call and answers with
//! `text_index`-tagged vectors, which are re-aligned before use.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use examkb_core::config::DashScopeSettings;
use examkb_core::error::{Error, Result};
use examkb_core::traits::EmbeddingProvider;
use examkb_core::types::EmbeddingVector;

use crate::batch::{align_indexed, check_dims, embed_chunked};

const NAME: &str = "dashscope";
const EMBEDDING_PATH: &str = "/services/embeddings/text-embedding/text-embedding";

pub struct DashScopeProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl DashScopeProvider {
    pub fn new(settings: &DashScopeSettings) -> Result<Self> {
        let api_key = settings.resolved_api_key()?;
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| Error::InvalidConfig("DashScope API key contains invalid header characters".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build DashScope HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}{EMBEDDING_PATH}", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            batch_size: settings.batch_size.max(1),
        })
    }

    fn embed_chunk(&self, chunk: usize, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        let fail = |message: String| Error::EmbeddingProvider { provider: NAME.to_string(), chunk, message };
        let request = EmbeddingRequest {
            model: &self.model,
            input: RequestInput { texts },
            parameters: RequestParameters { dimension: self.dimensions },
        };
        let resp = self.client.post(&self.endpoint).json(&request).send().map_err(|e| fail(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| format!("{}: {}", e.code.unwrap_or_default(), e.message.unwrap_or_default()))
                .unwrap_or(body);
            return Err(fail(format!("HTTP {status}: {detail}")));
        }
        let parsed: EmbeddingResponse = resp.json().map_err(|e| fail(format!("malformed response: {e}")))?;
        vectors_from_response(chunk, texts.len(), self.dimensions, parsed)
    }
}

impl EmbeddingProvider for DashScopeProvider {
    fn name(&self) -> &str { NAME }
    fn dim(&self) -> usize { self.dimensions }
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        embed_chunked(texts, self.batch_size, |chunk, batch| self.embed_chunk(chunk, batch))
    }
}

/// Turn one chunk response into input-ordered vectors.
fn vectors_from_response(chunk: usize, expected: usize, dim: usize, resp: EmbeddingResponse) -> Result<Vec<EmbeddingVector>> {
    let vectors = align_indexed(chunk, expected, resp.output.embeddings.into_iter().map(|e| (e.text_index, e.embedding)))?;
    check_dims(NAME, chunk, dim, &vectors)?;
    Ok(vectors)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: RequestInput<'a>,
    parameters: RequestParameters,
}

#[derive(Serialize)]
struct RequestInput<'a> {
    texts: &'a [String],
}

#[derive(Serialize)]
struct RequestParameters {
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    output: ResponseOutput,
}

#[derive(Deserialize)]
struct ResponseOutput {
    embeddings: Vec<IndexedEmbedding>,
}

#[derive(Deserialize)]
struct IndexedEmbedding {
    text_index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    code: Option<String>,
    message: Option<String>,
}
