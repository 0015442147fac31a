use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use examkb_core::config::{resolve_with_base, Config, Settings};
use examkb_core::ingest::Ingestor;
use examkb_core::schema::SchemaRegistry;
use examkb_core::source::load_csv_rows;
use examkb_core::traits::{EmbeddingProvider, VectorIndex};
use examkb_embed::build_provider;
use examkb_rerank::build_reranker;
use examkb_retrieval::{Recall, Retriever, SearchRequest, DEFAULT_TOP_K};
use examkb_vector::{collection_stats, samples, LanceVectorIndex};

#[derive(Parser)]
#[command(name = "examkb", version, about = "Exam question knowledge base: ingest, search, rerank")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load CSV files into the vector index. Rows already stored are skipped.
    Ingest {
        /// Source schema id (see `examkb schemas`).
        #[arg(long, default_value = "question_options")]
        schema: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Nearest-neighbour search without reranking.
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        #[arg(long)]
        json: bool,
    },
    /// Recall, cross-encoder rerank, keep the best `top_k`.
    Rerank {
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        #[arg(long)]
        json: bool,
    },
    /// Content length profile and per-field metadata value counts.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Print one page of stored entries.
    Samples {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// List registered source schemas.
    Schemas,
}

fn open_index(settings: &Settings) -> anyhow::Result<(Arc<dyn EmbeddingProvider>, Arc<dyn VectorIndex>)> {
    let provider = build_provider(&settings.embedding)?;
    let db_path = resolve_with_base(Path::new("."), &settings.index.path);
    let index = LanceVectorIndex::open(&db_path, &settings.index.collection, provider.clone())?;
    Ok((provider, Arc::new(index)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        Command::Ingest { schema, files } => {
            let registry = SchemaRegistry::with_extra(&settings.schemas)?;
            let (_, index) = open_index(&settings)?;
            let ingestor = Ingestor::new(index.clone(), registry);
            for file in &files {
                info!(file = %file.display(), schema = %schema, "ingesting");
                let rows = load_csv_rows(file)?;
                let report = ingestor.ingest_records(&schema, &rows)?;
                println!(
                    "{}: {} rows, {} added, {} skipped ({} with changed text), {} rejected",
                    file.display(),
                    rows.len(),
                    report.added,
                    report.skipped,
                    report.changed,
                    report.rejected.len()
                );
                for r in report.rejected.iter().take(20) {
                    println!("  row {}: {}", r.row + 1, r.reason);
                }
            }
            println!("✅ Index now holds {} entries", index.count()?);
        }
        Command::Search { query, top_k, json } => {
            let (provider, index) = open_index(&settings)?;
            let resp = Recall::new(index, provider.name()).search(&SearchRequest::new(query).with_top_k(top_k))?;
            if json {
                return print_json(&resp);
            }
            println!("🔎 {} ({} via {})", resp.query, resp.results.len(), resp.provider);
            for hit in &resp.results {
                println!("{:>3}. [{:.4}] {}  {}", hit.original_rank, hit.distance, hit.id, hit.content);
            }
        }
        Command::Rerank { query, top_k, json } => {
            let (provider, index) = open_index(&settings)?;
            let reranker = build_reranker(&settings.rerank)?;
            let retriever = Retriever::new(index, reranker, provider.name());
            let resp = retriever.search_with_rerank(&SearchRequest::new(query).with_top_k(top_k))?;
            if json {
                return print_json(&resp);
            }
            println!(
                "🔎 {} ({} via {} / {})",
                resp.query,
                resp.results.len(),
                resp.provider.as_deref().unwrap_or("-"),
                resp.rerank_strategy.as_deref().unwrap_or("-")
            );
            for hit in &resp.results {
                println!(
                    "{:>3}. score {:.4} (recall #{}, dist {:.4}) {}  {}",
                    hit.final_rank, hit.rerank_score, hit.original_rank, hit.distance, hit.id, hit.content
                );
            }
        }
        Command::Stats { json } => {
            let (provider, index) = open_index(&settings)?;
            let stats = collection_stats(index.as_ref())?;
            if json {
                return print_json(&stats);
            }
            println!("📊 collection '{}' ({} provider, dim {})", settings.index.collection, provider.name(), provider.dim());
            println!("entries: {}", stats.total_entries);
            let content = &stats.content;
            println!(
                "content length: avg {:.1}, min {}, max {}",
                content.avg_length, content.min_length, content.max_length
            );
            for (bucket, n) in &content.length_distribution {
                println!("  {bucket:<10} {n:>8}");
            }
            println!("metadata fields:");
            for (field, f) in &stats.fields {
                let top = f
                    .most_common
                    .as_ref()
                    .map(|v| format!("{} ×{}", v.value, v.count))
                    .unwrap_or_else(|| "-".to_string());
                println!("  {field:<20} {:>8} entries, {:>6} unique, most common: {top}", f.count, f.unique_values);
            }
        }
        Command::Samples { limit, offset, json } => {
            let (_, index) = open_index(&settings)?;
            let page = samples(index.as_ref(), offset, limit)?;
            if json {
                return print_json(&page);
            }
            for s in &page.samples {
                println!("#{} {}  {}", s.index, s.id, s.content);
                let meta: Vec<String> = s.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("    {}", meta.join(", "));
            }
            println!(
                "showing {} of {} from offset {}{}",
                page.samples.len(),
                page.total,
                page.offset,
                if page.has_more { " (more available)" } else { "" }
            );
        }
        Command::Schemas => {
            let registry = SchemaRegistry::with_extra(&settings.schemas)?;
            for id in registry.ids() {
                let schema = registry.get(id)?;
                println!("{id}: item={} choice={} template={}", schema.item_column, schema.choice_column, schema.template);
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    if let Err(err) = run(cli, settings) {
        if let Some(core) = err.downcast_ref::<examkb_core::Error>() {
            eprintln!("{}", serde_json::to_string(&core.to_body())?);
        }
        return Err(err);
    }
    Ok(())
}
