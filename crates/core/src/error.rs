use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported file type: .{extension} (supported: {supported})")]
    UnsupportedFormat { extension: String, supported: String },

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("no usable text extracted from {0}")]
    EmptyExtraction(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(
        "upsert failed on batch {failed_batch} of {total_batches}: \
         {committed} of {total} records committed before the failure: {source}"
    )]
    BatchPartialFailure {
        committed: usize,
        total: usize,
        failed_batch: usize,
        total_batches: usize,
        committed_ids: Vec<String>,
        #[source]
        source: Box<SearchError>,
    },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("record {chunk_id} has embedding dimension {actual}, expected {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("document not found in index: {0}")]
    DocumentNotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response from embedding service: {0}")]
    BackendResponse(String),

    #[error("http error: {0}")]
    Http(reqwest::Error),
}

impl From<reqwest::Error> for EmbedError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() {
            EmbedError::Unavailable(error.to_string())
        } else {
            EmbedError::Http(error)
        }
    }
}

/// Maps a transport failure against the vector store onto the error taxonomy.
pub(crate) fn store_transport_error(error: reqwest::Error, after: Option<Duration>) -> SearchError {
    if error.is_connect() {
        SearchError::StoreUnavailable(error.to_string())
    } else if error.is_timeout() {
        SearchError::Timeout {
            operation: "vector store request",
            after: after.unwrap_or_default(),
        }
    } else {
        SearchError::Http(error)
    }
}
