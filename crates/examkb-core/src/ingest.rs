//! Idempotent ingestion of source rows into a [`VectorIndex`].
//!
//! Rows are projected through the declared schema, checked against the index
//! with a single batched lookup, and only unseen ids are embedded and written.
//! Re-ingesting an id never rewrites it, even when its text changed.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::schema::{SchemaRegistry, SourceRow};
use crate::source::SourceRecord;
use crate::traits::VectorIndex;
use crate::types::KnowledgeEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    /// 0-based position in the input rows.
    pub row: usize,
    pub reason: String,
}

/// `added + skipped + rejected.len()` equals the number of input rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub added: usize,
    pub skipped: usize,
    /// Skipped rows whose stored text differs from the new projection.
    pub changed: usize,
    pub rejected: Vec<RowRejection>,
}

pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    registry: SchemaRegistry,
}

impl Ingestor {
    pub fn new(index: Arc<dyn VectorIndex>, registry: SchemaRegistry) -> Self { Self { index, registry } }

    pub fn registry(&self) -> &SchemaRegistry { &self.registry }

    pub fn ingest(&self, schema_id: &str, rows: &[SourceRow]) -> Result<IngestReport> {
        self.ingest_iter(schema_id, rows.len(), rows.iter().map(Ok))
    }

    /// Like [`Ingestor::ingest`], for records read from a source file. Records
    /// that failed to decode are counted as rejected at their own position.
    pub fn ingest_records(&self, schema_id: &str, records: &[SourceRecord]) -> Result<IngestReport> {
        self.ingest_iter(schema_id, records.len(), records.iter().map(|r| r.as_ref()))
    }

    fn ingest_iter<'a>(
        &self,
        schema_id: &str,
        len: usize,
        rows: impl Iterator<Item = std::result::Result<&'a SourceRow, &'a RowRejection>>,
    ) -> Result<IngestReport> {
        let schema = self.registry.get(schema_id)?;
        let mut report = IngestReport::default();

        let mut projected: Vec<KnowledgeEntry> = Vec::with_capacity(len);
        let mut seen: HashSet<String> = HashSet::with_capacity(len);
        for (i, row) in rows.enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(rejection) => {
                    report.rejected.push(RowRejection { row: i, reason: rejection.reason.clone() });
                    continue;
                }
            };
            match schema.project(i, row) {
                Ok(entry) => {
                    if seen.insert(entry.id.clone()) {
                        projected.push(entry);
                    } else {
                        debug!(row = i, id = %entry.id, "duplicate id within batch");
                        report.skipped += 1;
                    }
                }
                Err(Error::RowValidation { row, reason }) => {
                    warn!(row, %reason, "rejecting source row");
                    report.rejected.push(RowRejection { row, reason });
                }
                Err(other) => return Err(other),
            }
        }

        let ids: Vec<String> = projected.iter().map(|e| e.id.clone()).collect();
        let stored: HashMap<String, KnowledgeEntry> = if ids.is_empty() {
            HashMap::new()
        } else {
            self.index.get(&ids)?.into_iter().map(|e| (e.id.clone(), e)).collect()
        };

        let mut fresh = Vec::with_capacity(projected.len());
        for entry in projected {
            match stored.get(&entry.id) {
                Some(existing) => {
                    if existing.document_text != entry.document_text {
                        warn!(id = %entry.id, "source text changed for stored entry; keeping stored version");
                        report.changed += 1;
                    }
                    report.skipped += 1;
                }
                None => fresh.push(entry),
            }
        }

        if fresh.is_empty() {
            info!(schema = schema_id, skipped = report.skipped, rejected = report.rejected.len(), "nothing new to ingest");
            return Ok(report);
        }

        info!(schema = schema_id, new = fresh.len(), "writing new entries");
        let written = self.index.upsert(&fresh)?;
        report.added = written;
        report.skipped += fresh.len() - written.min(fresh.len());
        info!(added = report.added, skipped = report.skipped, changed = report.changed, rejected = report.rejected.len(), "ingestion finished");
        Ok(report)
    }
}
