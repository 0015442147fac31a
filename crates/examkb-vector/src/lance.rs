use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use arrow_array::RecordBatch;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use examkb_core::error::{Error, Result};
use examkb_core::traits::{EmbeddingProvider, VectorIndex};
use examkb_core::types::{Candidate, KnowledgeEntry};

use crate::rank_candidates;
use crate::schema::vector_dim;
use crate::table::{batch_reader, batch_to_entries, entries_to_batch, id_filter, open_db, open_if_exists};

const WRITE_BATCH: usize = 1000;

/// Persistent index over one LanceDB table.
///
/// The sync trait surface drives an owned runtime. Embedding calls happen outside
/// `block_on` since blocking HTTP clients must not run on a runtime thread.
pub struct LanceVectorIndex {
	rt: Runtime,
	db: Connection,
	table_name: String,
	provider: Arc<dyn EmbeddingProvider>,
}

impl LanceVectorIndex {
	pub fn open(db_path: &Path, table_name: &str, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
		let rt = Runtime::new()?;
		let uri = db_path.to_string_lossy().to_string();
		let db = rt.block_on(open_db(&uri))?;
		info!(path = %uri, table = table_name, provider = provider.name(), "opened vector index");
		Ok(Self { rt, db, table_name: table_name.to_string(), provider })
	}

	async fn table(&self) -> Result<Option<Table>> {
		open_if_exists(&self.db, &self.table_name).await
	}

	async fn drain<S, E>(stream: S) -> Result<Vec<(KnowledgeEntry, Option<f32>)>>
	where
		S: futures::Stream<Item = std::result::Result<RecordBatch, E>>,
		E: std::fmt::Display,
	{
		let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::index)?;
		let mut out = Vec::new();
		for batch in &batches {
			out.extend(batch_to_entries(batch)?);
		}
		Ok(out)
	}

	async fn row_count(&self) -> Result<usize> {
		match self.table().await? {
			Some(t) => t.count_rows(None).await.map_err(Error::index),
			None => Ok(0),
		}
	}

	async fn fetch(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>> {
		let Some(t) = self.table().await? else { return Ok(Vec::new()) };
		let stream = t.query().only_if(id_filter(ids)).execute().await.map_err(Error::index)?;
		Ok(Self::drain(stream).await?.into_iter().map(|(e, _)| e).collect())
	}

	async fn page(&self, offset: usize, limit: usize) -> Result<Vec<KnowledgeEntry>> {
		let Some(t) = self.table().await? else { return Ok(Vec::new()) };
		let stream = t.query().offset(offset).limit(limit).execute().await.map_err(Error::index)?;
		Ok(Self::drain(stream).await?.into_iter().map(|(e, _)| e).collect())
	}

	async fn nearest(&self, query_vector: Vec<f32>, k: usize) -> Result<Vec<(KnowledgeEntry, Option<f32>)>> {
		let Some(t) = self.table().await? else { return Ok(Vec::new()) };
		let stream = t
			.vector_search(query_vector)
			.map_err(Error::index)?
			.distance_type(DistanceType::Cosine)
			.limit(k)
			.execute()
			.await
			.map_err(Error::index)?;
		Self::drain(stream).await
	}

	async fn write(&self, fresh: &[&KnowledgeEntry], vectors: &[Vec<f32>], dim: i32) -> Result<usize> {
		let mut table = self.table().await?;
		if let Some(t) = &table {
			let schema = t.schema().await.map_err(Error::index)?;
			if let Some(existing) = vector_dim(&schema).filter(|d| *d != dim) {
				return Err(Error::InvalidConfig(format!(
					"collection '{}' stores {existing}-dim vectors but provider '{}' produced {dim}",
					self.table_name,
					self.provider.name()
				)));
			}
		}
		let before = match &table {
			Some(t) => t.count_rows(None).await.map_err(Error::index)?,
			None => 0,
		};

		let pb = ProgressBar::new(fresh.len() as u64);
		pb.set_style(
			ProgressStyle::default_bar()
				.template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entries ({percent}%) {msg}")
				.map(|s| s.progress_chars("#>-"))
				.unwrap_or_else(|_| ProgressStyle::default_bar()),
		);
		let mut written = 0usize;
		for (chunk, vecs) in fresh.chunks(WRITE_BATCH).zip(vectors.chunks(WRITE_BATCH)) {
			let rows: Vec<_> = chunk.iter().copied().zip(vecs.iter()).collect();
			let reader = batch_reader(entries_to_batch(&rows, dim)?);
			match &table {
				Some(t) => {
					// insert-only: existing ids are never touched
					let mut mi = t.merge_insert(&["id"]);
					mi.when_not_matched_insert_all();
					mi.execute(reader).await.map_err(Error::index)?;
				}
				None => {
					let created = self.db.create_table(&self.table_name, reader).execute().await.map_err(Error::index)?;
					table = Some(created);
				}
			}
			written += chunk.len();
			pb.set_position(written as u64);
		}
		pb.finish_and_clear();

		let after = match &table {
			Some(t) => t.count_rows(None).await.map_err(Error::index)?,
			None => 0,
		};
		Ok(after.saturating_sub(before))
	}
}

impl VectorIndex for LanceVectorIndex {
	fn get(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>> {
		if ids.is_empty() { return Ok(Vec::new()); }
		self.rt.block_on(self.fetch(ids))
	}

	fn upsert(&self, entries: &[KnowledgeEntry]) -> Result<usize> {
		if entries.is_empty() { return Ok(0); }
		let present = self.exists(&entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>())?;
		let mut seen = HashSet::new();
		let fresh: Vec<&KnowledgeEntry> = entries
			.iter()
			.filter(|e| !present.contains(&e.id) && seen.insert(e.id.as_str()))
			.collect();
		if fresh.is_empty() {
			debug!(requested = entries.len(), "all entries already stored");
			return Ok(0);
		}

		let texts: Vec<String> = fresh.iter().map(|e| e.document_text.clone()).collect();
		let vectors = self.provider.embed(&texts)?;
		if vectors.len() != fresh.len() {
			return Err(Error::EmbeddingAlignment {
				chunk: 0,
				expected: fresh.len(),
				missing: (vectors.len().min(fresh.len())..fresh.len()).collect(),
			});
		}
		let dim = vectors.first().map_or(0, Vec::len);
		if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
			return Err(Error::EmbeddingProvider {
				provider: self.provider.name().to_string(),
				chunk: 0,
				message: "provider returned empty or ragged vectors".into(),
			});
		}
		let dim = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("vector dimension {dim} too large")))?;

		let written = self.rt.block_on(self.write(&fresh, &vectors, dim))?;
		info!(table = %self.table_name, written, "stored entries");
		Ok(written)
	}

	fn query(&self, query_text: &str, k: usize) -> Result<Vec<Candidate>> {
		if k == 0 { return Ok(Vec::new()); }
		if self.count()? == 0 { return Ok(Vec::new()); }
		let query_vector = self
			.provider
			.embed(&[query_text.to_string()])?
			.pop()
			.ok_or_else(|| Error::EmbeddingAlignment { chunk: 0, expected: 1, missing: vec![0] })?;
		let rows = self.rt.block_on(self.nearest(query_vector, k))?;
		let scored = rows.into_iter().map(|(e, d)| (e, d.unwrap_or(f32::INFINITY))).collect();
		Ok(rank_candidates(scored, k))
	}

	fn count(&self) -> Result<usize> {
		self.rt.block_on(self.row_count())
	}

	fn scan(&self, offset: usize, limit: usize) -> Result<Vec<KnowledgeEntry>> {
		if limit == 0 { return Ok(Vec::new()); }
		self.rt.block_on(self.page(offset, limit))
	}
}
