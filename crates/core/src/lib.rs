pub mod chunking;
pub mod classifier;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod handles;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod stores;
pub mod traits;

pub use chunking::{make_chunk_id, segment, split_text, ChunkingConfig};
pub use classifier::{build_metadata, classify, extract_tags, Classification, DocumentClassifier};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingBackend, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbedError, IngestError, SearchError};
pub use extractor::{
    clean_extracted_text, extract_document, synthetic_pages, LopdfExtractor, PageExtractor,
    PlainTextExtractor,
};
pub use gateway::IndexGateway;
pub use handles::SharedHandle;
pub use ingest::{discover_documents, IngestPipeline, IngestionReport, SkippedDocument};
pub use models::{
    Chunk, ChunkingResult, DocumentMetadata, DocumentStats, ExtractionResult, IndexSettings,
    IndexStats, IndexedVector, IngestReport, Metadata, MetadataFilter, MetadataValue, Page,
    RetrievalResult, SearchHit, StoreMatch, StoredEntry,
};
pub use orchestrator::RetrievalCoordinator;
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::VectorStore;
