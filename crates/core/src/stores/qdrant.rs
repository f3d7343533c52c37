use crate::error::store_transport_error;
use crate::traits::VectorStore;
use crate::{IndexedVector, Metadata, MetadataFilter, MetadataValue, SearchError, StoreMatch, StoredEntry};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "qdrant";
const MAX_BATCH_SIZE: usize = 1_000;
const SCROLL_PAGE: usize = 256;
const CHUNK_ID_KEY: &str = "chunk_id";
const TEXT_KEY: &str = "text";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    timeout: Option<Duration>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl AsRef<str>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, SearchError> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: builder.build()?,
            vector_size,
            timeout,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn points_url(&self, action: &str) -> String {
        format!("{}/points{action}", self.collection_url())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SearchError> {
        request
            .send()
            .await
            .map_err(|error| store_transport_error(error, self.timeout))
    }

    /// Creates the collection with cosine distance if it does not exist yet,
    /// and checks the vector size of an existing one.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.send(self.client.get(self.collection_url())).await?;

        if response.status() == StatusCode::OK {
            let result = self.parse_result(response).await?;
            return match configured_vector_size(&result) {
                Some(size) if size != self.vector_size => Err(SearchError::Request(format!(
                    "collection {} stores vectors of size {size}, embedder produces {}",
                    self.collection, self.vector_size
                ))),
                _ => Ok(()),
            };
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .send(self.client.put(self.collection_url()).json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            })))
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "qdrant collection setup failed with {}",
                response.status()
            )));
        }

        info!(collection = %self.collection, vector_size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn parse_result(&self, response: Response) -> Result<Value, SearchError> {
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        let mut parsed: Value = response
            .json()
            .await
            .map_err(|error| store_transport_error(error, self.timeout))?;
        Ok(parsed.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

/// Size of the unnamed vector in a collection-info `result`.
fn configured_vector_size(collection: &Value) -> Option<usize> {
    collection
        .pointer("/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize)
}

/// Chunk ids are 16 hex characters, which is exactly a `u64` point id.
pub fn point_id(chunk_id: &str) -> Result<u64, SearchError> {
    u64::from_str_radix(chunk_id, 16)
        .map_err(|error| SearchError::Request(format!("chunk id {chunk_id:?} is not a point id: {error}")))
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions
        .iter()
        .map(|(key, value)| match value {
            MetadataValue::Float(number) => json!({"key": key, "range": {"gte": number, "lte": number}}),
            other => json!({"key": key, "match": {"value": other}}),
        })
        .collect();
    json!({ "must": must })
}

fn payload_json(record: &IndexedVector) -> Value {
    let mut payload = Map::new();
    for (key, value) in &record.metadata {
        payload.insert(key.clone(), json!(value));
    }
    payload.insert(CHUNK_ID_KEY.to_string(), Value::String(record.chunk_id.clone()));
    payload.insert(TEXT_KEY.to_string(), Value::String(record.text.clone()));
    Value::Object(payload)
}

/// Splits a stored payload back into `(chunk_id, text, metadata)`.
fn split_payload(point: &Value) -> (String, String, Metadata) {
    let mut chunk_id = String::new();
    let mut text = String::new();
    let mut metadata = Metadata::new();

    if let Some(payload) = point.get("payload").and_then(Value::as_object) {
        for (key, value) in payload {
            match key.as_str() {
                CHUNK_ID_KEY => chunk_id = value.as_str().unwrap_or_default().to_string(),
                TEXT_KEY => text = value.as_str().unwrap_or_default().to_string(),
                _ => {
                    if let Some(scalar) = scalar_value(value) {
                        metadata.insert(key.clone(), scalar);
                    }
                }
            }
        }
    }

    if chunk_id.is_empty() {
        if let Some(id) = point.get("id").and_then(Value::as_u64) {
            chunk_id = format!("{id:016x}");
        }
    }

    (chunk_id, text, metadata)
}

fn scalar_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Bool(flag) => Some(MetadataValue::Bool(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(MetadataValue::Int)
            .or_else(|| number.as_f64().map(MetadataValue::Float)),
        Value::String(text) => Some(MetadataValue::Str(text.clone())),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    async fn upsert(&self, records: &[IndexedVector]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records
            .iter()
            .map(|record| {
                if record.embedding.len() != self.vector_size {
                    return Err(SearchError::DimensionMismatch {
                        chunk_id: record.chunk_id.clone(),
                        expected: self.vector_size,
                        actual: record.embedding.len(),
                    });
                }
                Ok(json!({
                    "id": point_id(&record.chunk_id)?,
                    "vector": record.embedding,
                    "payload": payload_json(record),
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .send(
                self.client
                    .put(self.points_url("?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;
        self.parse_result(response).await?;
        debug!(count = records.len(), "upserted points");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoreMatch>, SearchError> {
        if vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|filter| !filter.is_empty()) {
            body["filter"] = filter_json(filter);
        }

        let response = self
            .send(self.client.post(self.points_url("/search")).json(&body))
            .await?;
        let result = self.parse_result(response).await?;

        let hits = result.as_array().cloned().unwrap_or_default();
        Ok(hits
            .iter()
            .map(|hit| {
                let (id, text, metadata) = split_payload(hit);
                let similarity = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                StoreMatch {
                    id,
                    distance: 1.0 - similarity,
                    text,
                    metadata,
                }
            })
            .collect())
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>, SearchError> {
        let mut entries = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(filter) = filter.filter(|filter| !filter.is_empty()) {
                body["filter"] = filter_json(filter);
            }
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .send(self.client.post(self.points_url("/scroll")).json(&body))
                .await?;
            let result = self.parse_result(response).await?;

            if let Some(points) = result.get("points").and_then(Value::as_array) {
                for point in points {
                    let (id, _, metadata) = split_payload(point);
                    entries.push(StoredEntry { id, metadata });
                }
            }

            offset = result.get("next_page_offset").cloned().unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(entries)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let points = ids
            .iter()
            .map(|id| point_id(id))
            .collect::<Result<Vec<_>, SearchError>>()?;
        let response = self
            .send(
                self.client
                    .post(self.points_url("/delete?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;
        self.parse_result(response).await?;
        Ok(ids.len())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .send(
                self.client
                    .post(self.points_url("/count"))
                    .json(&json!({ "exact": true })),
            )
            .await?;
        let result = self.parse_result(response).await?;

        result
            .get("count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response missing `count`".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn chunk_ids_round_trip_through_point_ids() -> Result<(), SearchError> {
        let id = point_id("00ff00ff00ff00ff")?;
        assert_eq!(id, 0x00ff_00ff_00ff_00ff);
        assert_eq!(format!("{id:016x}"), "00ff00ff00ff00ff");
        assert!(point_id("not-hex").is_err());
        Ok(())
    }

    #[test]
    fn filters_become_must_clauses() {
        let filter = MetadataFilter::new().eq("category", "finance").eq("page_number", 2i64);
        let value = filter_json(&filter);

        assert_eq!(
            value,
            json!({"must": [
                {"key": "category", "match": {"value": "finance"}},
                {"key": "page_number", "match": {"value": 2}},
            ]})
        );
    }

    #[test]
    fn payload_splits_back_into_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("doc_name".into(), "a.md".into());
        metadata.insert("page_number".into(), 4i64.into());
        let record = IndexedVector {
            chunk_id: "0123456789abcdef".to_string(),
            embedding: vec![0.0; 3],
            text: "chunk body".to_string(),
            metadata: metadata.clone(),
        };

        let point = json!({ "id": 1, "payload": payload_json(&record) });
        let (chunk_id, text, parsed) = split_payload(&point);

        assert_eq!(chunk_id, "0123456789abcdef");
        assert_eq!(text, "chunk body");
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            QdrantStore::new("not a url", "documents", 3, None),
            Err(SearchError::Url(_))
        ));
    }

    #[test]
    fn collection_info_exposes_the_vector_size() {
        let info = json!({
            "status": "green",
            "config": {"params": {"vectors": {"size": 384, "distance": "Cosine"}}},
        });
        assert_eq!(configured_vector_size(&info), Some(384));
        assert_eq!(configured_vector_size(&json!({"config": {}})), None);
    }

    /// Serves one canned HTTP response per connection, then holds the socket
    /// open without finishing the body.
    async fn stalling_server(response: String) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = [0u8; 4096];
                    let _ = socket.read(&mut request).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        Ok(format!("http://{address}"))
    }

    #[tokio::test]
    async fn stalled_response_body_is_a_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let endpoint = stalling_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"result\": {\"cou"
                .to_string(),
        )
        .await?;
        let store = QdrantStore::new(endpoint, "documents", 3, Some(Duration::from_millis(300)))?;

        let result = store.count().await;
        assert!(
            matches!(result, Err(SearchError::Timeout { .. })),
            "unexpected result: {result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn existing_collection_with_other_size_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let body = r#"{"result":{"config":{"params":{"vectors":{"size":768,"distance":"Cosine"}}}}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let endpoint = stalling_server(response).await?;
        let store = QdrantStore::new(endpoint, "documents", 384, Some(Duration::from_secs(5)))?;

        let result = store.ensure_collection().await;
        assert!(
            matches!(result, Err(SearchError::Request(ref message)) if message.contains("768")),
            "unexpected result: {result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() -> Result<(), SearchError> {
        let store = QdrantStore::new("http://127.0.0.1:9", "documents", 3, None)?;
        let record = IndexedVector {
            chunk_id: "0123456789abcdef".to_string(),
            embedding: vec![1.0, 0.0],
            text: String::new(),
            metadata: Metadata::new(),
        };

        let result = store.upsert(&[record]).await;
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() -> Result<(), SearchError> {
        let store = QdrantStore::new("http://127.0.0.1:9", "documents", 3, Some(Duration::from_secs(2)))?;
        let result = store.count().await;
        assert!(
            matches!(result, Err(SearchError::StoreUnavailable(_)) | Err(SearchError::Timeout { .. })),
            "unexpected result: {result:?}"
        );
        Ok(())
    }
}
