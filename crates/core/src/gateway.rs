//! Index gateway: the single entry point between the pipeline/coordinator and
//! a [`VectorStore`].
//!
//! Upserts are split into store-sized batches and stop at the first failing
//! batch. Searches convert cosine distance to a similarity score with
//! `1 - distance` (unclamped, store order preserved).
//!
//! There is no read-your-writes guarantee: a search running concurrently with
//! an upsert may or may not observe the records being written.

use crate::traits::VectorStore;
use crate::{
    DocumentStats, IndexStats, IndexedVector, MetadataFilter, MetadataValue, SearchError,
    SearchHit,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct IndexGateway<S: VectorStore> {
    store: Arc<S>,
    timeout: Option<Duration>,
}

impl<S: VectorStore> Clone for IndexGateway<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: VectorStore> IndexGateway<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Bounds every store call by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, SearchError>
    where
        F: Future<Output = Result<T, SearchError>>,
    {
        match self.timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| SearchError::Timeout { operation, after })?,
            None => call.await,
        }
    }

    /// Writes `records` in batches of the store's maximum size. Returns the
    /// number of records written.
    pub async fn upsert(&self, records: &[IndexedVector]) -> Result<usize, SearchError> {
        let Some(first) = records.first() else {
            return Ok(0);
        };

        let dimension = first.embedding.len();
        if let Some(odd) = records.iter().find(|record| record.embedding.len() != dimension) {
            return Err(SearchError::DimensionMismatch {
                chunk_id: odd.chunk_id.clone(),
                expected: dimension,
                actual: odd.embedding.len(),
            });
        }

        let batch_size = self.store.max_batch_size().max(1);
        let total = records.len();
        let total_batches = total.div_ceil(batch_size);
        let mut committed = 0;

        for (position, batch) in records.chunks(batch_size).enumerate() {
            if let Err(source) = self.bounded("upsert", self.store.upsert(batch)).await {
                if committed == 0 {
                    return Err(source);
                }

                warn!(
                    committed,
                    total,
                    failed_batch = position + 1,
                    total_batches,
                    error = %source,
                    "upsert stopped after a failing batch"
                );
                return Err(SearchError::BatchPartialFailure {
                    committed,
                    total,
                    failed_batch: position + 1,
                    total_batches,
                    committed_ids: records[..committed]
                        .iter()
                        .map(|record| record.chunk_id.clone())
                        .collect(),
                    source: Box::new(source),
                });
            }
            committed += batch.len();
        }

        debug!(count = committed, total_batches, "upserted records");
        Ok(committed)
    }

    /// Removes every chunk of `doc_name`. Absent documents remove nothing.
    pub async fn delete_document(&self, doc_name: &str) -> Result<usize, SearchError> {
        let filter = MetadataFilter::new().eq("doc_name", doc_name);
        let entries = self.bounded("get", self.store.get(Some(&filter))).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = entries.into_iter().map(|entry| entry.id).collect();
        let removed = self.bounded("delete", self.store.delete(&ids)).await?;
        info!(doc_name, removed, "deleted document chunks");
        Ok(removed)
    }

    pub async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let filter = filter.filter(|filter| !filter.is_empty());
        let matches = self.bounded("query", self.store.query(embedding, k, filter)).await?;
        Ok(matches.into_iter().map(SearchHit::from_match).collect())
    }

    pub async fn count(&self) -> Result<usize, SearchError> {
        self.bounded("count", self.store.count()).await
    }

    /// Chunk total plus per-document breakdown sorted by document name.
    pub async fn stats(&self) -> Result<IndexStats, SearchError> {
        let total_chunks = self.count().await?;
        let entries = self.bounded("get", self.store.get(None)).await?;

        let mut documents = BTreeMap::<String, DocumentStats>::new();
        for entry in entries {
            let text_field = |key: &str| {
                entry
                    .metadata
                    .get(key)
                    .and_then(MetadataValue::as_str)
                    .unwrap_or_default()
                    .to_string()
            };

            let doc_name = text_field("doc_name");
            let document = documents.entry(doc_name.clone()).or_insert_with(|| DocumentStats {
                doc_name,
                category: text_field("category"),
                chunk_count: 0,
                ingestion_date: text_field("ingestion_date"),
            });
            document.chunk_count += 1;
        }

        Ok(IndexStats {
            total_chunks,
            total_documents: documents.len(),
            documents: documents.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStore;
    use crate::{Metadata, StoreMatch, StoredEntry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str, doc_name: &str, embedding: Vec<f32>) -> IndexedVector {
        let mut metadata = Metadata::new();
        metadata.insert("doc_name".into(), doc_name.into());
        metadata.insert("category".into(), "general".into());
        metadata.insert("ingestion_date".into(), "2026-01-01T00:00:00+00:00".into());
        metadata.insert("page_number".into(), 1i64.into());
        metadata.insert("chunk_index".into(), 0i64.into());
        IndexedVector {
            chunk_id: id.to_string(),
            embedding,
            text: format!("text {id}"),
            metadata,
        }
    }

    /// Accepts `healthy_batches` upserts, then refuses everything.
    struct FlakyStore {
        inner: InMemoryStore,
        healthy_batches: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        fn max_batch_size(&self) -> usize {
            2
        }

        async fn upsert(&self, records: &[IndexedVector]) -> Result<(), SearchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_batches {
                return Err(SearchError::StoreUnavailable("connection refused".to_string()));
            }
            self.inner.upsert(records).await
        }

        async fn query(
            &self,
            vector: &[f32],
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<StoreMatch>, SearchError> {
            self.inner.query(vector, k, filter).await
        }

        async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>, SearchError> {
            self.inner.get(filter).await
        }

        async fn delete(&self, ids: &[String]) -> Result<usize, SearchError> {
            self.inner.delete(ids).await
        }

        async fn count(&self) -> Result<usize, SearchError> {
            self.inner.count().await
        }
    }

    struct SlowStore;

    #[async_trait]
    impl VectorStore for SlowStore {
        fn max_batch_size(&self) -> usize {
            10
        }

        async fn upsert(&self, _records: &[IndexedVector]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<StoreMatch>, SearchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn get(&self, _filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>, SearchError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _ids: &[String]) -> Result<usize, SearchError> {
            Ok(0)
        }

        async fn count(&self) -> Result<usize, SearchError> {
            Ok(0)
        }
    }

    fn flaky(healthy_batches: usize) -> IndexGateway<FlakyStore> {
        IndexGateway::new(Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            healthy_batches,
            calls: AtomicUsize::new(0),
        }))
    }

    fn five_records() -> Vec<IndexedVector> {
        (0..5)
            .map(|index| record(&format!("id-{index}"), "a.md", vec![1.0, 0.0]))
            .collect()
    }

    #[tokio::test]
    async fn partial_failure_reports_committed_records() {
        let gateway = flaky(1);
        let result = gateway.upsert(&five_records()).await;

        match result {
            Err(SearchError::BatchPartialFailure {
                committed,
                total,
                failed_batch,
                total_batches,
                committed_ids,
                source,
            }) => {
                assert_eq!(committed, 2);
                assert_eq!(total, 5);
                assert_eq!(failed_batch, 2);
                assert_eq!(total_batches, 3);
                assert_eq!(committed_ids, vec!["id-0".to_string(), "id-1".to_string()]);
                assert!(matches!(*source, SearchError::StoreUnavailable(_)));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_batch_failure_propagates_store_error() {
        let gateway = flaky(0);
        let result = gateway.upsert(&five_records()).await;
        assert!(matches!(result, Err(SearchError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn mixed_dimensions_are_rejected_before_writing() -> Result<(), SearchError> {
        let gateway = IndexGateway::new(Arc::new(InMemoryStore::new()));
        let records = vec![
            record("a", "a.md", vec![1.0, 0.0]),
            record("b", "a.md", vec![1.0, 0.0, 0.0]),
        ];

        match gateway.upsert(&records).await {
            Err(SearchError::DimensionMismatch {
                chunk_id,
                expected,
                actual,
            }) => {
                assert_eq!(chunk_id, "b");
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected a dimension mismatch, got {other:?}"),
        }
        assert_eq!(gateway.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_chunk_id() -> Result<(), SearchError> {
        let gateway = IndexGateway::new(Arc::new(InMemoryStore::new()));
        assert_eq!(gateway.upsert(&five_records()).await?, 5);
        assert_eq!(gateway.upsert(&five_records()).await?, 5);
        assert_eq!(gateway.count().await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn delete_document_counts_removed_chunks() -> Result<(), SearchError> {
        let gateway = IndexGateway::new(Arc::new(InMemoryStore::new()));
        gateway
            .upsert(&[
                record("a1", "a.md", vec![1.0, 0.0]),
                record("a2", "a.md", vec![0.0, 1.0]),
                record("b1", "b.md", vec![1.0, 1.0]),
            ])
            .await?;

        assert_eq!(gateway.delete_document("a.md").await?, 2);
        assert_eq!(gateway.delete_document("a.md").await?, 0);
        assert_eq!(gateway.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn search_maps_distance_to_score() -> Result<(), SearchError> {
        let gateway = IndexGateway::new(Arc::new(InMemoryStore::new()));
        gateway
            .upsert(&[
                record("same", "a.md", vec![1.0, 0.0]),
                record("orthogonal", "b.md", vec![0.0, 1.0]),
            ])
            .await?;

        let hits = gateway.search(&[1.0, 0.0], 2, None).await?;
        assert_eq!(hits[0].chunk_id, "same");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
        assert_eq!(hits[0].doc_name, "a.md");

        let filter = MetadataFilter::new().eq("doc_name", "b.md");
        let filtered = gateway.search(&[1.0, 0.0], 5, Some(&filter)).await?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk_id, "orthogonal");

        assert!(gateway.search(&[1.0, 0.0], 0, None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn slow_store_surfaces_timeout() {
        let gateway =
            IndexGateway::new(Arc::new(SlowStore)).with_timeout(Some(Duration::from_millis(20)));
        let result = gateway.search(&[1.0], 3, None).await;
        assert!(matches!(
            result,
            Err(SearchError::Timeout { operation: "query", .. })
        ));
    }

    #[tokio::test]
    async fn stats_group_documents_by_name() -> Result<(), SearchError> {
        let gateway = IndexGateway::new(Arc::new(InMemoryStore::new()));
        gateway
            .upsert(&[
                record("z1", "zeta.md", vec![1.0, 0.0]),
                record("a1", "alpha.md", vec![1.0, 0.0]),
                record("a2", "alpha.md", vec![0.0, 1.0]),
            ])
            .await?;

        let stats = gateway.stats().await?;
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_documents, 2);
        let names: Vec<_> = stats.documents.iter().map(|doc| doc.doc_name.as_str()).collect();
        assert_eq!(names, vec!["alpha.md", "zeta.md"]);
        assert_eq!(stats.documents[0].chunk_count, 2);
        assert_eq!(stats.documents[0].category, "general");
        Ok(())
    }
}
