use std::sync::Arc;

use examkb_core::traits::VectorIndex;
use examkb_core::types::{KnowledgeEntry, MetaValue, Metadata};
use examkb_embed::FakeProvider;
use examkb_vector::monitor::SCAN_PAGE;
use examkb_vector::{collection_stats, samples, MemoryVectorIndex};

fn entry(id: &str, text: &str, subject: &str, correct: bool) -> KnowledgeEntry {
    let mut metadata = Metadata::new();
    metadata.insert("subject".into(), MetaValue::from(subject));
    metadata.insert("is_correct".into(), MetaValue::Bool(correct));
    KnowledgeEntry { id: id.into(), document_text: text.into(), metadata }
}

fn seeded() -> MemoryVectorIndex {
    let index = MemoryVectorIndex::new(Arc::new(FakeProvider::new(32)));
    index
        .upsert(&[
            entry("q1_A", &"寄".repeat(10), "cpu", true),
            entry("q1_B", &"a".repeat(60), "cpu", false),
            entry("q2_A", &"b".repeat(300), "memory", false),
            entry("q2_B", &"c".repeat(900), "cpu", false),
        ])
        .expect("seed");
    index
}

#[test]
fn stats_profile_lengths_and_metadata() {
    let stats = collection_stats(&seeded()).expect("stats");
    assert_eq!(stats.total_entries, 4);
    assert_eq!(stats.content.min_length, 10, "lengths count chars, not bytes");
    assert_eq!(stats.content.max_length, 900);
    assert!((stats.content.avg_length - 317.5).abs() < 1e-9);
    let buckets: Vec<_> = stats.content.length_distribution.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(buckets, vec![("0-50", 1), ("51-200", 1), ("201-500", 1), ("500+", 1)]);

    let subject = &stats.fields["subject"];
    assert_eq!(subject.count, 4);
    assert_eq!(subject.unique_values, 2);
    let top = subject.most_common.as_ref().expect("most common");
    assert_eq!((top.value.as_str(), top.count), ("cpu", 3));

    let correct = &stats.fields["is_correct"];
    assert_eq!(correct.unique_values, 2);
    assert_eq!(correct.most_common.as_ref().map(|v| v.value.as_str()), Some("false"));
}

#[test]
fn stats_walk_past_one_scan_page() {
    let index = MemoryVectorIndex::new(Arc::new(FakeProvider::new(8)));
    let batch: Vec<_> = (0..SCAN_PAGE + 7).map(|i| entry(&format!("q{i}_A"), "x", "cpu", false)).collect();
    index.upsert(&batch).expect("seed");
    let stats = collection_stats(&index).expect("stats");
    assert_eq!(stats.total_entries, SCAN_PAGE + 7);
    assert_eq!(stats.fields["subject"].count, SCAN_PAGE + 7);
}

#[test]
fn empty_collection_stats() {
    let index = MemoryVectorIndex::new(Arc::new(FakeProvider::new(8)));
    let stats = collection_stats(&index).expect("stats");
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.content.avg_length, 0.0);
    assert!(stats.fields.is_empty());
    let json = serde_json::to_value(&stats).expect("serialize");
    assert_eq!(json["content"]["length_distribution"]["500+"], 0);
}

#[test]
fn samples_paginate_with_has_more() {
    let index = seeded();
    let first = samples(&index, 0, 3).expect("first page");
    assert_eq!(first.total, 4);
    assert!(first.has_more);
    assert_eq!(first.samples.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(first.samples[0].id, "q1_A");

    let last = samples(&index, 3, 3).expect("last page");
    assert!(!last.has_more);
    assert_eq!(last.samples.len(), 1);
    assert_eq!(last.samples[0].index, 3);
    assert_eq!(last.samples[0].metadata["subject"], MetaValue::from("cpu"));

    let past = samples(&index, 10, 3).expect("past the end");
    assert!(past.samples.is_empty());
    assert!(!past.has_more);
    assert_eq!(past.total, 4);
}
