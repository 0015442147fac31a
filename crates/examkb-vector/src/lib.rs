//! Vector storage for knowledge entries.
//!
//! [`LanceVectorIndex`] persists to a LanceDB table; [`MemoryVectorIndex`] keeps
//! everything in process. Both embed through an injected provider and rank by
//! cosine distance.

pub mod lance;
pub mod memory;
pub mod monitor;
pub mod schema;
pub mod table;

pub use lance::LanceVectorIndex;
pub use memory::{cosine_distance, MemoryVectorIndex};
pub use monitor::{collection_stats, samples, CollectionStats, SamplePage};

use examkb_core::types::{Candidate, KnowledgeEntry};

/// Order by ascending distance, ties by id, keep `k`, assign 1-based ranks.
pub fn rank_candidates(mut scored: Vec<(KnowledgeEntry, f32)>, k: usize) -> Vec<Candidate> {
	scored.sort_by(|(ea, da), (eb, db)| da.total_cmp(db).then_with(|| ea.id.cmp(&eb.id)));
	scored
		.into_iter()
		.take(k)
		.enumerate()
		.map(|(i, (entry, distance))| Candidate { entry, distance, original_rank: i + 1 })
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use examkb_core::types::Metadata;

	fn entry(id: &str) -> KnowledgeEntry {
		KnowledgeEntry { id: id.into(), document_text: String::new(), metadata: Metadata::new() }
	}

	#[test]
	fn ties_break_by_id_and_ranks_start_at_one() {
		let ranked = rank_candidates(vec![(entry("q2_A"), 0.3), (entry("q1_B"), 0.3), (entry("q1_A"), 0.1)], 2);
		let ids: Vec<_> = ranked.iter().map(|c| (c.entry.id.as_str(), c.original_rank)).collect();
		assert_eq!(ids, vec![("q1_A", 1), ("q1_B", 2)]);
	}
}
