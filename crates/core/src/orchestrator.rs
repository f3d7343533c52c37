use crate::embeddings::Embedder;
use crate::gateway::IndexGateway;
use crate::traits::VectorStore;
use crate::{EmbedError, MetadataFilter, RetrievalResult, SearchError, SearchHit};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct RetrievalCoordinator<E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore,
{
    embedder: Arc<E>,
    gateway: IndexGateway<S>,
    timeout: Option<Duration>,
}

impl<E, S> RetrievalCoordinator<E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore,
{
    pub fn new(embedder: Arc<E>, gateway: IndexGateway<S>) -> Self {
        Self {
            embedder,
            gateway,
            timeout: None,
        }
    }

    /// Bounds the query embedding call; store calls use the gateway's own bound.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        category: Option<&str>,
        doc_name: Option<&str>,
    ) -> Result<RetrievalResult, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }

        let filter = build_filter(category, doc_name);
        let embedding = self.embed_query(query).await?;
        let hits = self.gateway.search(&embedding, k, filter.as_ref()).await?;
        let total_candidates = self.gateway.count().await?;

        let hits = rank_hits(hits);
        debug!(query, k, hits = hits.len(), total_candidates, "retrieved chunks");

        Ok(RetrievalResult {
            query: query.to_string(),
            hits,
            total_candidates,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let call = self.embedder.embed_one(query);
        let embedding = match self.timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| EmbedError::Timeout(after))??,
            None => call.await?,
        };
        Ok(embedding)
    }
}

/// Equality filter from whichever of the two criteria are present.
pub fn build_filter(category: Option<&str>, doc_name: Option<&str>) -> Option<MetadataFilter> {
    let mut filter = MetadataFilter::new();
    if let Some(category) = category {
        filter = filter.eq("category", category);
    }
    if let Some(doc_name) = doc_name {
        filter = filter.eq("doc_name", doc_name);
    }
    (!filter.is_empty()).then_some(filter)
}

fn rank_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| seen.insert(hit.chunk_id.clone()))
        .collect();

    ranked.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.doc_name.cmp(&right.doc_name))
            .then_with(|| left.chunk_index.cmp(&right.chunk_index))
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    ranked
}
