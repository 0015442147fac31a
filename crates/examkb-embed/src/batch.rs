//! Sub-batching and response alignment shared by the remote backends.

use examkb_core::error::{Error, Result};
use examkb_core::types::EmbeddingVector;
use tracing::debug;

/// Split `texts` into chunks of at most `batch_size`, call `call(chunk_index, chunk)`
/// for each and concatenate the results in input order. The first failing chunk
/// aborts the whole call; no partial output is returned.
pub fn embed_chunked<F>(texts: &[String], batch_size: usize, mut call: F) -> Result<Vec<EmbeddingVector>>
where
    F: FnMut(usize, &[String]) -> Result<Vec<EmbeddingVector>>,
{
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());
    for (chunk_index, chunk) in texts.chunks(batch_size).enumerate() {
        debug!(chunk = chunk_index, size = chunk.len(), "embedding chunk");
        let vectors = call(chunk_index, chunk)?;
        if vectors.len() != chunk.len() {
            return Err(Error::EmbeddingAlignment {
                chunk: chunk_index,
                expected: chunk.len(),
                missing: (vectors.len().min(chunk.len())..chunk.len()).collect(),
            });
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Place vectors by the backend's own return index. Every slot in `0..expected`
/// must be filled exactly once; anything else is a misaligned response.
pub fn align_indexed<I>(chunk: usize, expected: usize, items: I) -> Result<Vec<EmbeddingVector>>
where
    I: IntoIterator<Item = (usize, EmbeddingVector)>,
{
    let mut slots: Vec<Option<EmbeddingVector>> = vec![None; expected];
    let mut stray = false;
    for (index, vector) in items {
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(vector),
            _ => stray = true,
        }
    }
    let missing: Vec<usize> = slots.iter().enumerate().filter(|(_, s)| s.is_none()).map(|(i, _)| i).collect();
    if stray || !missing.is_empty() {
        return Err(Error::EmbeddingAlignment { chunk, expected, missing });
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Reject vectors whose length differs from the configured dimension.
pub fn check_dims(provider: &str, chunk: usize, dim: usize, vectors: &[EmbeddingVector]) -> Result<()> {
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(Error::EmbeddingProvider {
            provider: provider.to_string(),
            chunk,
            message: format!("vector {i} has dimension {} (expected {dim})", v.len()),
        });
    }
    Ok(())
}
