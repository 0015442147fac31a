use std::collections::BTreeSet;

use crate::shared::PairScorer;

/// Fraction of query terms that occur in the candidate. Needs no model.
///
/// Whitespace-separated words are terms; runs of non-ASCII letters (CJK text
/// has no spaces) contribute one term per character.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlapScorer;

fn terms(query: &str) -> BTreeSet<String> {
    let lower = query.to_lowercase();
    let mut out = BTreeSet::new();
    for word in lower.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation())) {
        let mut ascii = String::new();
        for c in word.chars() {
            if c.is_ascii() {
                ascii.push(c);
            } else if c.is_alphanumeric() {
                out.insert(c.to_string());
            }
        }
        if !ascii.is_empty() { out.insert(ascii); }
    }
    out
}

impl KeywordOverlapScorer {
    pub fn overlap(query: &str, doc: &str) -> f32 {
        let terms = terms(query);
        if terms.is_empty() { return 0.0; }
        let doc = doc.to_lowercase();
        let hits = terms.iter().filter(|t| doc.contains(t.as_str())).count();
        hits as f32 / terms.len() as f32
    }
}

impl PairScorer for KeywordOverlapScorer {
    const STRATEGY: &'static str = "keyword-overlap";

    fn score_pairs(&self, query: &str, docs: &[String]) -> anyhow::Result<Vec<f32>> {
        Ok(docs.iter().map(|d| Self::overlap(query, d)).collect())
    }
}
