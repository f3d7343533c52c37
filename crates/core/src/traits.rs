use crate::{IndexedVector, MetadataFilter, SearchError, StoreMatch, StoredEntry};
use async_trait::async_trait;

/// Approximate-nearest-neighbour store with cosine distance and equality
/// metadata filters.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Largest number of records a single `upsert` call may carry.
    fn max_batch_size(&self) -> usize;

    /// Inserts or replaces records keyed on `chunk_id`.
    async fn upsert(&self, records: &[IndexedVector]) -> Result<(), SearchError>;

    /// Up to `k` neighbours of `vector`, closest first, with cosine distance.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoreMatch>, SearchError>;

    /// Ids and metadata of every record matching `filter` (all records when `None`).
    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>, SearchError>;

    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;
}
