use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One page of cleaned text. Page numbers are 1-indexed and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub file_name: String,
    pub file_path: String,
    pub total_pages: usize,
    pub pages: Vec<Page>,
    pub extraction_errors: Vec<String>,
}

impl ExtractionResult {
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|page| page.text.chars().count()).sum()
    }

    pub fn non_empty_pages(&self) -> usize {
        self.pages.iter().filter(|page| !page.is_blank()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub doc_name: String,
    pub doc_path: String,
    pub page_number: u32,
    pub chunk_index: u64,
    pub char_count: usize,
    pub token_estimate: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub doc_name: String,
    pub total_chunks: usize,
    pub chunks: Vec<Chunk>,
    pub avg_chunk_size: f64,
}

impl ChunkingResult {
    pub fn new(doc_name: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        let avg_chunk_size = if chunks.is_empty() {
            0.0
        } else {
            chunks.iter().map(|chunk| chunk.char_count).sum::<usize>() as f64 / chunks.len() as f64
        };

        Self {
            doc_name: doc_name.into(),
            total_chunks: chunks.len(),
            chunks,
            avg_chunk_size,
        }
    }
}

/// Scalar metadata value. Stores only accept primitives, so composite values
/// are flattened before they get here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_name: String,
    pub doc_path: String,
    pub category: String,
    pub ingestion_date: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub file_size_bytes: u64,
    pub tags: BTreeSet<String>,
}

impl DocumentMetadata {
    /// Flattens the document metadata for a single chunk. Tags are joined
    /// with commas since stores reject list values.
    pub fn flatten_for_chunk(&self, page_number: u32, chunk_index: u64) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("doc_name".into(), self.doc_name.as_str().into());
        metadata.insert("doc_path".into(), self.doc_path.as_str().into());
        metadata.insert("category".into(), self.category.as_str().into());
        metadata.insert("ingestion_date".into(), self.ingestion_date.as_str().into());
        metadata.insert("page_number".into(), i64::from(page_number).into());
        metadata.insert("chunk_index".into(), to_i64(chunk_index).into());
        metadata.insert("page_count".into(), to_i64(self.page_count as u64).into());
        metadata.insert("chunk_count".into(), to_i64(self.chunk_count as u64).into());
        metadata.insert("file_size_bytes".into(), to_i64(self.file_size_bytes).into());
        metadata.insert(
            "tags".into(),
            self.tags.iter().cloned().collect::<Vec<_>>().join(",").into(),
        );
        metadata
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// The persisted unit: one chunk with its embedding and flattened metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// Equality conjunction over metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub conditions: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// A raw neighbour as returned by a vector store, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMatch {
    pub id: String,
    pub distance: f64,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub doc_name: String,
    pub page_number: u32,
    pub category: String,
    pub chunk_index: u64,
}

impl SearchHit {
    pub fn from_match(found: StoreMatch) -> Self {
        let text_field = |key: &str| {
            found
                .metadata
                .get(key)
                .and_then(MetadataValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let int_field = |key: &str| {
            found
                .metadata
                .get(key)
                .and_then(MetadataValue::as_i64)
                .unwrap_or(0)
        };

        Self {
            doc_name: text_field("doc_name"),
            category: text_field("category"),
            page_number: u32::try_from(int_field("page_number")).unwrap_or(0),
            chunk_index: u64::try_from(int_field("chunk_index")).unwrap_or(0),
            score: 1.0 - found.distance,
            chunk_id: found.id,
            text: found.text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub total_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub doc_name: String,
    pub category: String,
    pub chunk_count: usize,
    pub ingestion_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_documents: usize,
    pub documents: Vec<DocumentStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub doc_name: String,
    pub pages_extracted: usize,
    pub chunks_created: usize,
    pub category: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    pub collection: String,
    pub max_file_size_bytes: u64,
    pub chars_per_synthetic_page: usize,
    pub synthetic_page_threshold: usize,
    pub max_concurrent_documents: usize,
    pub request_timeout: Option<Duration>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            embedding_batch_size: 100,
            collection: "documents".to_string(),
            max_file_size_bytes: 50 * 1024 * 1024,
            chars_per_synthetic_page: 3_000,
            synthetic_page_threshold: 4_000,
            max_concurrent_documents: 4,
            request_timeout: None,
        }
    }
}
