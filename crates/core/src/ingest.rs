use crate::chunking::{segment, ChunkingConfig};
use crate::classifier::{build_metadata, DocumentClassifier};
use crate::embeddings::{embed_in_batches, Embedder};
use crate::extractor::{extract_document, is_supported_extension};
use crate::gateway::IndexGateway;
use crate::traits::VectorStore;
use crate::{
    ChunkingResult, EmbedError, ExtractionResult, IndexSettings, IndexedVector, IngestError,
    IngestReport, SearchError,
};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Every supported document under `folder`, recursively, in sorted order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(is_supported_extension);

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestReport>,
    pub skipped_files: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|report| report.chunks_created).sum()
    }
}

/// Extract, segment, classify, embed and index documents.
pub struct IngestPipeline<E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore,
{
    embedder: Arc<E>,
    gateway: IndexGateway<S>,
    classifier: DocumentClassifier,
    chunking: ChunkingConfig,
    settings: IndexSettings,
}

impl<E, S> IngestPipeline<E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore,
{
    pub fn new(
        embedder: Arc<E>,
        gateway: IndexGateway<S>,
        settings: IndexSettings,
    ) -> Result<Self, IngestError> {
        let chunking = ChunkingConfig::try_from(&settings)?;
        Ok(Self {
            embedder,
            gateway,
            classifier: DocumentClassifier::default(),
            chunking,
            settings,
        })
    }

    pub fn with_classifier(mut self, classifier: DocumentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn gateway(&self) -> &IndexGateway<S> {
        &self.gateway
    }

    /// Ingests one file. Re-ingesting an unchanged file replaces its chunks
    /// in place since chunk ids are content-derived.
    pub async fn ingest_file(
        &self,
        path: &Path,
        category_override: Option<&str>,
    ) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        let (extraction, chunks) = self.extract_and_segment(path).await?;

        if chunks.chunks.is_empty() {
            return Err(IngestError::EmptyExtraction(extraction.file_name));
        }

        let file_size_bytes = tokio::fs::metadata(path).await?.len();
        let sample = extraction
            .pages
            .first()
            .map(|page| page.text.as_str())
            .unwrap_or_default();
        let mut metadata = build_metadata(
            &self.classifier,
            &extraction.file_name,
            &extraction.file_path,
            extraction.total_pages,
            chunks.total_chunks,
            sample,
            file_size_bytes,
        );
        if let Some(category) = category_override {
            metadata.category = category.to_string();
        }

        let texts: Vec<String> = chunks.chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embed(&texts).await?;

        let records: Vec<IndexedVector> = chunks
            .chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedVector {
                metadata: metadata.flatten_for_chunk(chunk.page_number, chunk.chunk_index),
                chunk_id: chunk.chunk_id,
                embedding,
                text: chunk.text,
            })
            .collect();
        let chunks_created = self.gateway.upsert(&records).await?;

        let report = IngestReport {
            doc_name: extraction.file_name.clone(),
            pages_extracted: extraction.non_empty_pages(),
            chunks_created,
            category: metadata.category,
            elapsed: started.elapsed(),
        };
        info!(
            doc_name = %report.doc_name,
            pages = report.pages_extracted,
            chunks = report.chunks_created,
            category = %report.category,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingested document"
        );
        Ok(report)
    }

    async fn extract_and_segment(
        &self,
        path: &Path,
    ) -> Result<(ExtractionResult, ChunkingResult), IngestError> {
        let path = path.to_path_buf();
        let settings = self.settings.clone();
        let config = self.chunking;

        tokio::task::spawn_blocking(move || {
            let extraction = extract_document(&path, &settings)?;
            let chunks = segment(
                &extraction.file_name,
                &extraction.file_path,
                &extraction.pages,
                config,
            );
            Ok::<_, IngestError>((extraction, chunks))
        })
        .await
        .map_err(|error| IngestError::Task(error.to_string()))?
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let batch_size = self.settings.embedding_batch_size;
        let call = embed_in_batches(self.embedder.as_ref(), texts, batch_size);
        match self.settings.request_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| EmbedError::Timeout(after))?,
            None => call.await,
        }
    }

    /// Best-effort folder ingestion: failing files are reported as skipped
    /// while the rest are indexed.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported documents found in {}",
                folder.display()
            )));
        }

        let mut outcomes: Vec<(PathBuf, Result<IngestReport, IngestError>)> = stream::iter(files)
            .map(|path| async move {
                let outcome = self.ingest_file(&path, None).await;
                (path, outcome)
            })
            .buffer_unordered(self.settings.max_concurrent_documents.max(1))
            .collect()
            .await;
        outcomes.sort_by(|left, right| left.0.cmp(&right.0));

        let mut report = IngestionReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(ingested) => report.ingested.push(ingested),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipped document");
                    report.skipped_files.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped_files.len(),
            chunks = report.total_chunks(),
            "folder ingestion finished"
        );
        Ok(report)
    }

    /// Deletes every chunk of `doc_name`, failing when none existed.
    pub async fn remove_document(&self, doc_name: &str) -> Result<usize, IngestError> {
        let removed = self.gateway.delete_document(doc_name).await?;
        if removed == 0 {
            return Err(SearchError::DocumentNotFound(doc_name.to_string()).into());
        }
        Ok(removed)
    }
}
