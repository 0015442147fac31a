//! LanceDB connection helpers and the row <-> Arrow mapping for the entry table.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, RecordBatchReader, StringArray};
use lancedb::{connect, Connection, Table};

use examkb_core::error::{Error, Result};
use examkb_core::types::{EmbeddingVector, KnowledgeEntry, Metadata};

use crate::schema::{build_entry_schema, DISTANCE, DOCUMENT, ID, METADATA};

pub async fn open_db(uri: &str) -> Result<Connection> {
	connect(uri).execute().await.map_err(Error::index)
}

/// The named table, or `None` when nothing has been written yet.
pub async fn open_if_exists(conn: &Connection, name: &str) -> Result<Option<Table>> {
	let names = conn.table_names().execute().await.map_err(Error::index)?;
	if !names.iter().any(|n| n == name) {
		return Ok(None);
	}
	Ok(Some(conn.open_table(name).execute().await.map_err(Error::index)?))
}

pub fn entries_to_batch(entries: &[(&KnowledgeEntry, &EmbeddingVector)], dim: i32) -> Result<RecordBatch> {
	let mut ids = Vec::with_capacity(entries.len());
	let mut documents = Vec::with_capacity(entries.len());
	let mut metadata = Vec::with_capacity(entries.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
	for (entry, vector) in entries {
		ids.push(entry.id.clone());
		documents.push(entry.document_text.clone());
		metadata.push(serde_json::to_string(&entry.metadata).map_err(|e| Error::InvalidRequest(format!("metadata for {}: {e}", entry.id)))?);
		vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
	}
	RecordBatch::try_new(build_entry_schema(dim), vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(documents)),
		Arc::new(StringArray::from(metadata)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
	])
	.map_err(Error::index)
}

pub fn batch_reader(batch: RecordBatch) -> Box<dyn RecordBatchReader + Send> {
	let schema = batch.schema();
	Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::IndexUnavailable(format!("column '{name}' missing or not utf8")))
}

/// Decode stored rows. The distance column is read when present (vector search results).
pub fn batch_to_entries(batch: &RecordBatch) -> Result<Vec<(KnowledgeEntry, Option<f32>)>> {
	let ids = string_column(batch, ID)?;
	let documents = string_column(batch, DOCUMENT)?;
	let metadata = string_column(batch, METADATA)?;
	let distances = batch.column_by_name(DISTANCE).and_then(|c| c.as_any().downcast_ref::<Float32Array>());
	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let meta: Metadata = serde_json::from_str(metadata.value(i))
			.map_err(|e| Error::IndexUnavailable(format!("corrupt metadata for {}: {e}", ids.value(i))))?;
		let entry = KnowledgeEntry { id: ids.value(i).to_string(), document_text: documents.value(i).to_string(), metadata: meta };
		let distance = distances.filter(|d| !d.is_null(i)).map(|d| d.value(i));
		out.push((entry, distance));
	}
	Ok(out)
}

/// SQL `IN` filter over ids, quotes escaped.
pub fn id_filter(ids: &[String]) -> String {
	let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
	format!("{ID} IN ({})", quoted.join(", "))
}
