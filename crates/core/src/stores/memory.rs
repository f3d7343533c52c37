//! In-memory [`VectorStore`] for tests and local experiments.
//!
//! Records live in a map keyed by chunk id behind a `tokio::sync::RwLock`, so
//! concurrent upserts of the same id serialise and the last writer wins.
//! Queries are brute-force cosine distance over every stored vector.

use crate::traits::VectorStore;
use crate::{IndexedVector, MetadataFilter, SearchError, StoreMatch, StoredEntry};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

pub const DEFAULT_MEMORY_BATCH_SIZE: usize = 5_000;

pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, IndexedVector>>,
    max_batch_size: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_max_batch_size(DEFAULT_MEMORY_BATCH_SIZE)
    }

    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            max_batch_size: max_batch_size.max(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - f64::from(dot / (mag_a * mag_b))
    }
}

fn passes(filter: Option<&MetadataFilter>, record: &IndexedVector) -> bool {
    filter.map_or(true, |filter| filter.matches(&record.metadata))
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn upsert(&self, records: &[IndexedVector]) -> Result<(), SearchError> {
        if records.len() > self.max_batch_size {
            return Err(SearchError::Request(format!(
                "batch of {} exceeds maximum of {}",
                records.len(),
                self.max_batch_size
            )));
        }

        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.chunk_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoreMatch>, SearchError> {
        let stored = self.records.read().await;
        let mut matches: Vec<StoreMatch> = stored
            .values()
            .filter(|record| passes(filter, record))
            .map(|record| StoreMatch {
                id: record.chunk_id.clone(),
                distance: cosine_distance(vector, &record.embedding),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();

        matches.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.id.cmp(&right.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>, SearchError> {
        let stored = self.records.read().await;
        Ok(stored
            .values()
            .filter(|record| passes(filter, record))
            .map(|record| StoredEntry {
                id: record.chunk_id.clone(),
                metadata: record.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError> {
        let mut stored = self.records.write().await;
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.records.read().await.len())
    }
}
