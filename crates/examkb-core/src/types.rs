//! Domain types shared by ingestion, the vector index and retrieval.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type EntryId = String;
pub type EmbeddingVector = Vec<f32>;

/// Scalar metadata value. Serialises as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self { MetaValue::Text(s.to_string()) }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self { MetaValue::Bool(b) }
}

/// Insertion-ordered metadata map.
pub type Metadata = IndexMap<String, MetaValue>;

/// Idempotency key for one (item, choice) pair.
pub fn entry_id(item_id: &str, choice_key: &str) -> EntryId {
    format!("q{item_id}_{choice_key}")
}

/// One stored question/option pair.
///
/// - `id`: `q{item_id}_{choice_key}`, unique within the index
/// - `document_text`: the text that gets embedded and reranked
/// - `metadata`: schema-defined scalar fields, in schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: EntryId,
    pub document_text: String,
    pub metadata: Metadata,
}

/// Recall-stage hit. `distance` is lower-is-closer, `original_rank` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entry: KnowledgeEntry,
    pub distance: f32,
    pub original_rank: usize,
}

/// Candidate after cross-encoder scoring and re-sorting.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedResult {
    pub entry: KnowledgeEntry,
    pub distance: f32,
    pub original_rank: usize,
    pub rerank_score: f32,
    pub final_rank: usize,
}
