use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use examkb_core::error::Result;
use examkb_core::ingest::Ingestor;
use examkb_core::schema::{SchemaRegistry, SourceRow, QUESTION_OPTIONS};
use examkb_core::source::load_csv_rows;
use examkb_core::traits::VectorIndex;
use examkb_core::types::{Candidate, KnowledgeEntry};

/// Index double that records how it is called.
#[derive(Default)]
struct RecordingIndex {
    entries: Mutex<BTreeMap<String, KnowledgeEntry>>,
    get_calls: Mutex<Vec<usize>>,
    upsert_calls: Mutex<Vec<Vec<String>>>,
}

impl VectorIndex for RecordingIndex {
    fn get(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>> {
        self.get_calls.lock().unwrap().push(ids.len());
        let entries = self.entries.lock().unwrap();
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    fn upsert(&self, batch: &[KnowledgeEntry]) -> Result<usize> {
        self.upsert_calls.lock().unwrap().push(batch.iter().map(|e| e.id.clone()).collect());
        let mut entries = self.entries.lock().unwrap();
        let mut written = 0;
        for e in batch {
            if !entries.contains_key(&e.id) {
                entries.insert(e.id.clone(), e.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    fn query(&self, _query_text: &str, _k: usize) -> Result<Vec<Candidate>> { Ok(vec![]) }

    fn count(&self) -> Result<usize> { Ok(self.entries.lock().unwrap().len()) }

    fn scan(&self, offset: usize, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        Ok(self.entries.lock().unwrap().values().skip(offset).take(limit).cloned().collect())
    }
}

fn option_row(item: &str, choice: &str, text: &str, correct: &str) -> SourceRow {
    [
        ("question_id", item),
        ("question_text", "2+2=?"),
        ("option_key", choice),
        ("option_text", text),
        ("is_correct", correct),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[test]
fn ingest_twice_adds_nothing_the_second_time() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    let rows = vec![option_row("1", "A", "2+2=4", "true"), option_row("1", "B", "2+2=5", "false")];

    let first = ingestor.ingest(QUESTION_OPTIONS, &rows).expect("first ingest");
    assert_eq!((first.added, first.skipped), (2, 0));
    let ids: Vec<String> = index.entries.lock().unwrap().keys().cloned().collect();
    assert_eq!(ids, ["q1_A", "q1_B"]);
    let snapshot = index.entries.lock().unwrap().clone();

    let second = ingestor.ingest(QUESTION_OPTIONS, &rows).expect("second ingest");
    assert_eq!((second.added, second.skipped), (0, 2));
    assert_eq!(*index.entries.lock().unwrap(), snapshot, "index contents unchanged");
    // one batched lookup per run; the second run never reaches the write path
    assert_eq!(*index.get_calls.lock().unwrap(), vec![2, 2]);
    assert_eq!(index.upsert_calls.lock().unwrap().len(), 1);
}

#[test]
fn new_rows_are_written_once_in_source_order() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    ingestor.ingest(QUESTION_OPTIONS, &[option_row("2", "B", "x", "0")]).expect("seed");

    let rows = vec![
        option_row("3", "C", "c", "0"),
        option_row("2", "B", "x", "0"),
        option_row("3", "A", "a", "1"),
        option_row("1", "D", "d", "0"),
    ];
    let report = ingestor.ingest(QUESTION_OPTIONS, &rows).expect("ingest");
    assert_eq!((report.added, report.skipped), (3, 1));
    let calls = index.upsert_calls.lock().unwrap();
    assert_eq!(calls.last().unwrap(), &vec!["q3_C".to_string(), "q3_A".to_string(), "q1_D".to_string()]);
}

#[test]
fn malformed_rows_are_counted_not_fatal() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    let mut broken = option_row("5", "A", "t", "yes");
    broken.shift_remove("question_text");
    let rows = vec![broken, option_row("5", "B", "t", "nope"), option_row("5", "C", "t", "no")];

    let report = ingestor.ingest(QUESTION_OPTIONS, &rows).expect("ingest");
    assert_eq!(report.added, 1);
    assert_eq!(report.rejected.iter().map(|r| r.row).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(report.added + report.skipped + report.rejected.len(), rows.len());
}

#[test]
fn changed_text_is_reported_but_not_rewritten() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    ingestor.ingest(QUESTION_OPTIONS, &[option_row("1", "A", "2+2=4", "1")]).expect("seed");

    let report = ingestor.ingest(QUESTION_OPTIONS, &[option_row("1", "A", "2+2=four", "1")]).expect("re-ingest");
    assert_eq!((report.added, report.skipped, report.changed), (0, 1, 1));
    let stored = index.entries.lock().unwrap()["q1_A"].document_text.clone();
    assert!(stored.ends_with("2+2=4"), "stored text kept: {stored}");
}

#[test]
fn duplicate_ids_within_one_batch_keep_the_first() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    let rows = vec![option_row("1", "A", "first", "1"), option_row("1", "A", "second", "1")];
    let report = ingestor.ingest(QUESTION_OPTIONS, &rows).expect("ingest");
    assert_eq!((report.added, report.skipped), (1, 1));
    assert!(index.entries.lock().unwrap()["q1_A"].document_text.ends_with("first"));
}

#[test]
fn unknown_schema_is_an_error() {
    let ingestor = Ingestor::new(Arc::new(RecordingIndex::default()), SchemaRegistry::builtin());
    let err = ingestor.ingest("no_such_schema", &[]).unwrap_err();
    assert_eq!(err.kind(), examkb_core::ErrorKind::UnknownSchema);
}

#[test]
fn csv_file_feeds_ingestion() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("objective.csv");
    fs::write(&path, "编号,题干,选项\n1,寄存器位于,A\n1,寄存器位于,B\n2,,C\n").unwrap();

    let rows = load_csv_rows(&path).expect("load");
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    let report = ingestor.ingest_records("stem_options", &rows).expect("ingest");
    assert_eq!(report.added, 3, "empty stem is allowed, only key columns are required");
    assert_eq!(index.entries.lock().unwrap()["q1_B"].document_text, "寄存器位于 B");
}

#[test]
fn undecodable_csv_row_is_rejected_without_aborting_the_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("options.csv");
    let mut data = b"question_id,question_text,option_key,option_text,is_correct\n1,q,A,ok,1\n2,q,B,".to_vec();
    data.extend_from_slice(&[0xff, 0xfe]);
    data.extend_from_slice(b",0\n3,q,C,fine,0\n");
    fs::write(&path, data).unwrap();

    let records = load_csv_rows(&path).expect("load");
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(index.clone(), SchemaRegistry::builtin());
    let report = ingestor.ingest_records(QUESTION_OPTIONS, &records).expect("ingest");

    assert_eq!(report.added, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].row, 1);
    assert_eq!(report.added + report.skipped + report.rejected.len(), records.len());
    let entries = index.entries.lock().unwrap();
    assert!(entries.contains_key("q1_A"));
    assert!(entries.contains_key("q3_C"));
}
