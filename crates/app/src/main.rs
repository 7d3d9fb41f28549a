use chrono::Utc;
use clap::{Parser, Subcommand};
use passage_index_core::{
    CharacterNgramEmbedder, Chunker, ChunkingConfig, Embedder, HttpEmbedder, IndexCatalog,
    IngestionOptions, RetrievalCoordinator, RetrievalResult,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "passage-index", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted per-document indexes
    #[arg(long, env = "PASSAGE_INDEX_DIR", default_value = "vector_store")]
    storage_dir: String,

    /// Target chunk size in characters
    #[arg(long, default_value_t = IngestionOptions::default().chunk_size)]
    chunk_size: usize,

    /// Characters of trailing sentences carried into the next chunk
    #[arg(long, default_value_t = IngestionOptions::default().overlap)]
    overlap: usize,

    /// Embedding dimension produced by the embedder
    #[arg(long, env = "PASSAGE_INDEX_DIMENSIONS", default_value = "384")]
    embedding_dimensions: usize,

    /// Hosted embedding service; the offline trigram embedder is used when unset
    #[arg(long, env = "PASSAGE_INDEX_EMBEDDER_URL")]
    embedder_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index a plain-text document.
    Ingest {
        /// Identifier the document is stored under.
        #[arg(long)]
        document_id: String,
        /// Path to the already-extracted text.
        #[arg(long)]
        file: String,
    },
    /// Retrieve passages from one document, or compare several.
    Search {
        /// Document to search; repeat to run a comparison query.
        #[arg(long = "document-id", required = true)]
        document_ids: Vec<String>,
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of passages per document.
        #[arg(long, default_value_t = IngestionOptions::default().top_k)]
        top_k: usize,
        /// Print the stored embedding of each hit.
        #[arg(long, default_value_t = false)]
        include_vectors: bool,
    },
    /// List indexed document ids.
    List,
    /// Show chunk count, dimension and durability of a document.
    Info {
        #[arg(long)]
        document_id: String,
    },
    /// Print the stored chunks of a document.
    Chunks {
        #[arg(long)]
        document_id: String,
        #[arg(long, default_value_t = false)]
        include_vectors: bool,
    },
    /// Delete a document and its persisted files.
    Delete {
        #[arg(long)]
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        storage_dir = %cli.storage_dir,
        "passage-index boot"
    );

    let catalog = Arc::new(IndexCatalog::open(&cli.storage_dir)?);
    let report = catalog.load_all();
    for skipped in &report.skipped {
        warn!(document_id = %skipped.document_id, reason = %skipped.reason, "skipped index");
    }

    let embedder: Arc<dyn Embedder> = match &cli.embedder_url {
        Some(url) => Arc::new(HttpEmbedder::new(url.as_str(), cli.embedding_dimensions)),
        None => Arc::new(CharacterNgramEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
    };
    let chunker = Chunker::new(ChunkingConfig::new(cli.chunk_size, cli.overlap)?)?;
    let coordinator = RetrievalCoordinator::new(chunker, Arc::clone(&catalog), embedder);

    match cli.command {
        Command::Ingest { document_id, file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let report = coordinator.ingest(&document_id, &text).await?;
            println!(
                "{} chunks ingested for {} (avg {} chars, min {}, max {}, dim {}) at {}",
                report.stats.total_chunks,
                report.document_id,
                report.stats.avg_chunk_size,
                report.stats.min_chunk_size,
                report.stats.max_chunk_size,
                report.dimension,
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            document_ids,
            query,
            top_k,
            include_vectors,
        } => {
            println!("query: {query}");
            if let [document_id] = document_ids.as_slice() {
                let results = coordinator
                    .retrieve_with(document_id, &query, top_k, include_vectors)
                    .await?;
                print_results(&results);
            } else {
                let merged = coordinator
                    .retrieve_many_with(&document_ids, &query, top_k, include_vectors)
                    .await?;
                for missing in &merged.missing_document_ids {
                    println!("not found: {missing}");
                }
                print_results(&merged.results);
            }
        }
        Command::List => {
            for document_id in catalog.list_document_ids() {
                println!("{document_id}");
            }
        }
        Command::Info { document_id } => {
            let info = catalog.info(&document_id)?;
            println!(
                "document_id={} chunks={} dimension={} durable={}",
                info.document_id, info.chunk_count, info.dimension, info.durable
            );
        }
        Command::Chunks {
            document_id,
            include_vectors,
        } => {
            for stored in catalog.chunks(&document_id, include_vectors)? {
                println!(
                    "[{}] chars={} words={}\n{}",
                    stored.chunk.index, stored.chunk.char_count, stored.chunk.word_count, stored.chunk.text
                );
                if let Some(embedding) = stored.embedding {
                    println!("  embedding={embedding:?}");
                }
            }
        }
        Command::Delete { document_id } => {
            if catalog.delete_document(&document_id)? {
                println!("deleted {document_id}");
            } else {
                println!("{document_id} was not indexed");
            }
        }
    }

    Ok(())
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("no matches");
    }
    for hit in results {
        println!(
            "[{}] score={:.4} distance={:.4} chunk={} document_id={}",
            hit.rank,
            hit.similarity_score,
            hit.squared_distance,
            hit.chunk.index,
            hit.source_document_id
        );
        println!("  chunk_text:\n{}", hit.chunk.text);
        if let Some(embedding) = &hit.embedding {
            println!("  embedding={embedding:?}");
        }
    }
}
