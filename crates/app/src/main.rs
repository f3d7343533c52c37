use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_retrieval_core::{
    CharacterNgramEmbedder, Embedder, EmbeddingBackend, HttpEmbedder, HttpEmbedderConfig,
    IndexGateway, IndexSettings, IngestPipeline, QdrantStore, RetrievalCoordinator, SharedHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docsift", version, about = "Index documents and search them by similarity")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "documents")]
    collection: String,

    /// Maximum characters per chunk
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 500)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 50)]
    chunk_overlap: usize,

    /// Embedding service endpoint; the local trigram embedder is used when unset
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = doc_retrieval_core::DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Texts per embedding call
    #[arg(long, env = "EMBEDDING_BATCH_SIZE", default_value_t = 100)]
    embedding_batch_size: usize,

    /// Documents ingested concurrently from a folder
    #[arg(long, env = "MAX_CONCURRENT_DOCUMENTS", default_value_t = 4)]
    max_concurrent_documents: usize,

    /// Bound on each store and embedding call, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file, or every supported file under a folder.
    Ingest {
        #[arg(long)]
        path: PathBuf,
        /// Use this category instead of the detected one (single files only).
        #[arg(long)]
        category: Option<String>,
    },
    /// Search indexed chunks.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        doc_name: Option<String>,
    },
    /// Remove every chunk of a document.
    Delete {
        #[arg(long)]
        doc_name: String,
    },
    /// Show chunk and document counts.
    Stats,
}

impl Cli {
    fn settings(&self) -> IndexSettings {
        IndexSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embedding_batch_size: self.embedding_batch_size,
            collection: self.collection.clone(),
            max_concurrent_documents: self.max_concurrent_documents,
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            ..IndexSettings::default()
        }
    }
}

/// Clients shared by every command, created on first use and released on exit.
#[derive(Default)]
struct Services {
    embedder: SharedHandle<EmbeddingBackend>,
    store: SharedHandle<QdrantStore>,
}

impl Services {
    async fn embedder(&self, cli: &Cli) -> anyhow::Result<Arc<EmbeddingBackend>> {
        self.embedder
            .acquire(|| async {
                let backend = match &cli.embedding_url {
                    Some(endpoint) => EmbeddingBackend::Http(HttpEmbedder::new(HttpEmbedderConfig {
                        endpoint: endpoint.clone(),
                        model: cli.embedding_model.clone(),
                        api_key: cli.embedding_api_key.clone(),
                        dimensions: cli.embedding_dimensions,
                        timeout: cli.request_timeout_secs.map(Duration::from_secs),
                    })?),
                    None => EmbeddingBackend::Ngram(CharacterNgramEmbedder {
                        dimensions: cli.embedding_dimensions,
                    }),
                };
                Ok::<_, anyhow::Error>(backend)
            })
            .await
            .context("initialising embedder")
    }

    async fn store(&self, cli: &Cli, dimensions: usize) -> anyhow::Result<Arc<QdrantStore>> {
        self.store
            .acquire(|| async {
                let store = QdrantStore::new(
                    &cli.qdrant_url,
                    &cli.collection,
                    dimensions,
                    cli.request_timeout_secs.map(Duration::from_secs),
                )?;
                store.ensure_collection().await?;
                Ok::<_, anyhow::Error>(store)
            })
            .await
            .with_context(|| format!("connecting to qdrant at {}", cli.qdrant_url))
    }

    async fn release(&self) {
        self.embedder.release().await;
        self.store.release().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docsift boot"
    );

    let services = Services::default();
    let outcome = run(&cli, &services).await;
    services.release().await;
    outcome
}

async fn run(cli: &Cli, services: &Services) -> anyhow::Result<()> {
    let settings = cli.settings();
    let embedder = services.embedder(cli).await?;
    let store = services.store(cli, embedder.dimensions()).await?;
    let gateway = IndexGateway::new(store).with_timeout(settings.request_timeout);

    match &cli.command {
        Command::Ingest { path, category } => {
            let pipeline = IngestPipeline::new(embedder, gateway, settings)?;

            if path.is_dir() {
                if category.is_some() {
                    warn!("--category is ignored for folder ingestion");
                }
                let report = pipeline.ingest_folder(path).await?;
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }

                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&report.ingested)?);
                } else {
                    for ingested in &report.ingested {
                        println!(
                            "{} pages={} chunks={} category={}",
                            ingested.doc_name,
                            ingested.pages_extracted,
                            ingested.chunks_created,
                            ingested.category
                        );
                    }
                    println!(
                        "{} documents, {} chunks ingested, {} skipped",
                        report.ingested.len(),
                        report.total_chunks(),
                        report.skipped_files.len()
                    );
                }
            } else {
                let report = pipeline.ingest_file(path, category.as_deref()).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!(
                        "{} pages={} chunks={} category={} in {:.2}s",
                        report.doc_name,
                        report.pages_extracted,
                        report.chunks_created,
                        report.category,
                        report.elapsed.as_secs_f64()
                    );
                }
            }
        }
        Command::Search {
            query,
            top_k,
            category,
            doc_name,
        } => {
            let coordinator =
                RetrievalCoordinator::new(embedder, gateway).with_timeout(settings.request_timeout);
            let result = coordinator
                .retrieve(query, *top_k, category.as_deref(), doc_name.as_deref())
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("query: {} ({} chunks indexed)", result.query, result.total_candidates);
            for hit in result.hits {
                println!(
                    "score={:.4} doc={} page={} chunk={} category={}",
                    hit.score, hit.doc_name, hit.page_number, hit.chunk_index, hit.category
                );
                println!("  {}", hit.text);
            }
        }
        Command::Delete { doc_name } => {
            let pipeline = IngestPipeline::new(embedder, gateway, settings)?;
            let removed = pipeline.remove_document(doc_name).await?;
            println!("{removed} chunks removed for {doc_name}");
        }
        Command::Stats => {
            let stats = gateway.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!(
                "{} chunks across {} documents",
                stats.total_chunks, stats.total_documents
            );
            for document in stats.documents {
                println!(
                    "{} category={} chunks={} ingested={}",
                    document.doc_name, document.category, document.chunk_count, document.ingestion_date
                );
            }
        }
    }

    Ok(())
}
