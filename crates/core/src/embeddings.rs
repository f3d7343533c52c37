use crate::error::EmbedError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Maps texts to unit-normalised vectors of a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::BackendResponse("no vector returned for query".to_string()))
    }
}

/// Embeds `texts` in calls of at most `batch_size` inputs, preserving order.
pub async fn embed_in_batches<E>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedError>
where
    E: Embedder + ?Sized,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(EmbedError::BackendResponse(format!(
                "expected {} vectors, got {}",
                batch.len(),
                embedded.len()
            )));
        }
        vectors.extend(embedded);
    }
    debug!(count = vectors.len(), batch_size, "embedded texts");
    Ok(vectors)
}

pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Deterministic local embedder: hashed character trigrams.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    data: Option<Vec<EmbeddingDatum>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an external embedding service. Accepts both the
/// `{"embeddings": [...]}` and the `{"data": [{"embedding": ...}]}` shapes.
pub struct HttpEmbedder {
    config: HttpEmbedderConfig,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbedError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { config, client })
    }

    fn map_send_error(&self, error: reqwest::Error) -> EmbedError {
        if error.is_timeout() {
            EmbedError::Timeout(self.config.timeout.unwrap_or_default())
        } else {
            EmbedError::from(error)
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: texts,
            });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| self.map_send_error(error))?;
        if !response.status().is_success() {
            return Err(EmbedError::BackendResponse(format!(
                "{} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| self.map_send_error(error))?;
        let vectors = payload_to_vectors(payload, texts.len(), self.config.dimensions)?;
        Ok(vectors)
    }
}

fn payload_to_vectors(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut vectors = match (payload.embeddings, payload.data) {
        (Some(embeddings), _) => embeddings,
        (None, Some(data)) => data.into_iter().map(|datum| datum.embedding).collect(),
        (None, None) => {
            return Err(EmbedError::BackendResponse(
                "response has neither `embeddings` nor `data`".to_string(),
            ))
        }
    };

    if vectors.len() != expected {
        return Err(EmbedError::BackendResponse(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }

    for vector in &mut vectors {
        if vector.len() != dimensions {
            return Err(EmbedError::BackendResponse(format!(
                "vector dimension {} != {dimensions}",
                vector.len()
            )));
        }
        normalize(vector);
    }

    Ok(vectors)
}

/// Runtime-selected embedder used by the binary.
pub enum EmbeddingBackend {
    Ngram(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    fn dimensions(&self) -> usize {
        match self {
            EmbeddingBackend::Ngram(embedder) => Embedder::dimensions(embedder),
            EmbeddingBackend::Http(embedder) => embedder.dimensions(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            EmbeddingBackend::Ngram(embedder) => embedder.embed_batch(texts).await,
            EmbeddingBackend::Http(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Annual leave entitlement");
        let second = embedder.embed("Annual leave entitlement");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_unit_vectors_of_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abcdef");
        assert_eq!(vector.len(), 32);
        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|text| vec![text.len() as f32, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn batches_are_bounded_and_ordered() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (1..=7).map(|len| "x".repeat(len)).collect();

        let vectors = embed_in_batches(&embedder, &texts, 3).await.expect("embedding succeeds");

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        let lengths: Vec<f32> = vectors.iter().map(|vector| vector[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn openai_style_payload_is_normalised() {
        let payload: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"embedding": [3.0, 4.0]}, {"embedding": [0.0, 2.0]}]}"#,
        )
        .expect("payload parses");

        let vectors = payload_to_vectors(payload, 2, 2).expect("vectors are valid");
        assert_eq!(vectors[0], vec![0.6, 0.8]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn stalled_embedding_body_is_a_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 8192];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                          content-length: 128\r\n\r\n{\"embeddings\": [[0.1,",
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: format!("http://{address}/embed"),
            model: "test".to_string(),
            api_key: None,
            dimensions: 2,
            timeout: Some(Duration::from_millis(300)),
        })?;

        let result = embedder.embed_one("hello").await;
        assert!(
            matches!(result, Err(EmbedError::Timeout(_))),
            "unexpected result: {result:?}"
        );
        Ok(())
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let payload: EmbeddingResponse =
            serde_json::from_str(r#"{"embeddings": [[1.0, 0.0, 0.0]]}"#).expect("payload parses");
        assert!(matches!(
            payload_to_vectors(payload, 1, 2),
            Err(EmbedError::BackendResponse(_))
        ));

        let payload: EmbeddingResponse = serde_json::from_str(r#"{}"#).expect("payload parses");
        assert!(payload_to_vectors(payload, 1, 2).is_err());
    }
}
