//! Embeddings from an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use finsight_models::config::SemanticConfig;
use serde::Deserialize;
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::StoreError;

/// Remote embedder speaking the OpenAI embeddings wire format.
///
/// Works with OpenAI, Ollama, vLLM and other compatible servers. Wrap it in
/// [`crate::CachedEmbedder`] so repeated texts skip the network.
pub struct HttpEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Embedding(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            dimension,
            client,
        })
    }

    pub fn from_config(config: &SemanticConfig) -> Result<Self, StoreError> {
        Self::new(
            &config.embedding_base_url,
            config.embedding_api_key.clone(),
            &config.embedding_model,
            config.embedding_dimension,
            Duration::from_secs(config.embedding_timeout_seconds),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });
        debug!(model = %self.model, count = texts.len(), "Sending embedding request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(StoreError::Embedding(format!(
                "embeddings API returned {status}: {error_body}"
            )));
        }

        let mut parsed: EmbeddingApiResponse = response.json().await.map_err(|e| {
            StoreError::Embedding(format!("failed to parse embedding response: {e}"))
        })?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != texts.len() {
            return Err(StoreError::Embedding(format!(
                "embeddings API returned {} vectors for {} texts",
                parsed.data.len(),
                texts.len()
            )));
        }
        if let Some(bad) = parsed.data.iter().find(|d| d.embedding.len() != self.dimension) {
            return Err(StoreError::Embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                bad.embedding.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned HTTP response and hand back the request body.
    async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let request_body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    let body = &text[split + 4..];
                    if body.len() >= length || n == 0 {
                        break body.to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };

            let response = format!(
                "HTTP/1.1 {status}\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            let _ = tx.send(request_body);
        });

        (format!("http://{addr}/v1"), rx)
    }

    #[tokio::test]
    async fn embeds_batch_in_input_order() {
        let reply = serde_json::json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]}
            ],
            "model": "text-embedding-3-small"
        });
        let (base_url, request) = serve_once("200 OK", reply.to_string()).await;
        let embedder = HttpEmbedder::new(
            base_url,
            Some("sk-test".to_string()),
            "text-embedding-3-small",
            3,
            Duration::from_secs(5),
        )
        .unwrap();

        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);

        let sent: Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent["model"], "text-embedding-3-small");
        assert_eq!(sent["input"], serde_json::json!(["first", "second"]));
    }

    #[tokio::test]
    async fn error_status_is_an_embedding_error() {
        let (base_url, _request) =
            serve_once("401 Unauthorized", r#"{"error": "bad key"}"#.to_string()).await;
        let embedder =
            HttpEmbedder::new(base_url, None, "m", 3, Duration::from_secs(5)).unwrap();

        let err = embedder.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, StoreError::Embedding(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let reply = r#"{"data": [{"index": 0, "embedding": [0.5, 0.5]}]}"#.to_string();
        let (base_url, _request) = serve_once("200 OK", reply).await;
        let embedder =
            HttpEmbedder::new(base_url, None, "m", 3, Duration::from_secs(5)).unwrap();

        let err = embedder.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, StoreError::Embedding(ref msg) if msg.contains("dimension")));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        let embedder = HttpEmbedder::new(
            "http://127.0.0.1:9",
            None,
            "m",
            3,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
