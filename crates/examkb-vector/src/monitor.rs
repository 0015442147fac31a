//! Read-only collection reports: content length profile, per-field metadata
//! value counts, and paged samples. Works over any [`VectorIndex`].

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use examkb_core::error::Result;
use examkb_core::traits::VectorIndex;
use examkb_core::types::{KnowledgeEntry, Metadata};

/// Entries fetched per `scan` call while walking the whole collection.
pub const SCAN_PAGE: usize = 500;

/// Upper bound (inclusive, in chars) and label of each length bucket; the last is open.
const LENGTH_BUCKETS: [(usize, &str); 4] = [(50, "0-50"), (200, "51-200"), (500, "201-500"), (usize::MAX, "500+")];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentStats {
	pub avg_length: f64,
	pub min_length: usize,
	pub max_length: usize,
	/// Bucket label -> entry count, every bucket present.
	pub length_distribution: IndexMap<&'static str, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
	pub value: String,
	pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
	/// Entries carrying the field.
	pub count: usize,
	pub unique_values: usize,
	/// Ties go to the value seen first.
	pub most_common: Option<ValueCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
	pub total_entries: usize,
	pub content: ContentStats,
	/// Field name -> stats, in first-seen order.
	pub fields: IndexMap<String, FieldStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
	/// Position in scan order.
	pub index: usize,
	pub id: String,
	pub content: String,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePage {
	pub total: usize,
	pub offset: usize,
	pub limit: usize,
	pub has_more: bool,
	pub samples: Vec<Sample>,
}

fn bucket_of(len: usize) -> &'static str {
	LENGTH_BUCKETS.iter().find(|(max, _)| len <= *max).map_or("500+", |(_, label)| label)
}

#[derive(Default)]
struct Accumulator {
	entries: usize,
	total_chars: usize,
	min: Option<usize>,
	max: usize,
	buckets: IndexMap<&'static str, usize>,
	values: IndexMap<String, IndexMap<String, usize>>,
}

impl Accumulator {
	fn new() -> Self {
		Self { buckets: LENGTH_BUCKETS.iter().map(|(_, label)| (*label, 0)).collect(), ..Self::default() }
	}

	fn add(&mut self, entry: &KnowledgeEntry) {
		let len = entry.document_text.chars().count();
		self.entries += 1;
		self.total_chars += len;
		self.min = Some(self.min.map_or(len, |m| m.min(len)));
		self.max = self.max.max(len);
		*self.buckets.entry(bucket_of(len)).or_default() += 1;
		for (key, value) in &entry.metadata {
			*self.values.entry(key.clone()).or_default().entry(value.to_string()).or_default() += 1;
		}
	}

	fn finish(self) -> CollectionStats {
		let avg_length = if self.entries == 0 { 0.0 } else { self.total_chars as f64 / self.entries as f64 };
		let fields = self
			.values
			.into_iter()
			.map(|(field, values)| {
				let most_common = values.iter().fold(None::<(&String, usize)>, |best, (v, &n)| match best {
					Some((_, m)) if m >= n => best,
					_ => Some((v, n)),
				});
				let stats = FieldStats {
					count: values.values().sum(),
					unique_values: values.len(),
					most_common: most_common.map(|(v, n)| ValueCount { value: v.clone(), count: n }),
				};
				(field, stats)
			})
			.collect();
		CollectionStats {
			total_entries: self.entries,
			content: ContentStats {
				avg_length,
				min_length: self.min.unwrap_or(0),
				max_length: self.max,
				length_distribution: self.buckets,
			},
			fields,
		}
	}
}

/// Walk every stored entry and summarise it.
pub fn collection_stats(index: &dyn VectorIndex) -> Result<CollectionStats> {
	let mut acc = Accumulator::new();
	let mut offset = 0;
	loop {
		let page = index.scan(offset, SCAN_PAGE)?;
		if page.is_empty() {
			break;
		}
		offset += page.len();
		page.iter().for_each(|e| acc.add(e));
		debug!(scanned = offset, "collection stats progress");
	}
	Ok(acc.finish())
}

/// One page of stored entries in scan order. An offset past the end yields an empty page.
pub fn samples(index: &dyn VectorIndex, offset: usize, limit: usize) -> Result<SamplePage> {
	let total = index.count()?;
	let entries = if limit == 0 || offset >= total { Vec::new() } else { index.scan(offset, limit)? };
	let samples: Vec<Sample> = entries
		.into_iter()
		.enumerate()
		.map(|(i, e)| Sample { index: offset + i, id: e.id, content: e.document_text, metadata: e.metadata })
		.collect();
	let has_more = offset.min(total) + samples.len() < total;
	Ok(SamplePage { total, offset, limit, has_more, samples })
}
