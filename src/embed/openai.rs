use super::{validate_vectors, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{ProviderError, Result, SyncError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI embeddings API client.
///
/// Retries 429, 5xx and network failures with exponential backoff (1s, 2s, 4s ... capped
/// at 32s); any other 4xx fails immediately.
pub struct OpenAiProvider {
    id: String,
    model: String,
    dimensions: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| SyncError::Config(format!("{API_KEY_ENV} environment variable not set")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            id: format!("openai/{}/{}", config.model, config.dimensions),
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::new(&self.id, message)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!("Retrying embeddings request in {:?} (attempt {})", delay, attempt);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| self.error(format!("invalid response body: {e}")))?;
                        let vectors = parse_response(&json).map_err(|m| self.error(m))?;
                        validate_vectors(&self.id, texts.len(), self.dimensions, &vectors)?;
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!("OpenAI API returned {}, will retry", status);
                        last_err = Some(self.error(format!("HTTP {status}: {body_text}")));
                        continue;
                    }

                    return Err(self.error(format!("HTTP {status}: {body_text}")));
                }
                Err(err) => {
                    warn!("OpenAI request failed: {}", err);
                    last_err = Some(self.error(err.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| self.error("embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present
fn parse_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("missing data array")?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or("missing embedding")?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_orders_by_index() {
        let body = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_response_missing_data() {
        assert!(parse_response(&json!({"error": "nope"})).is_err());
        assert!(parse_response(&json!({"data": [{"index": 0}]})).is_err());
    }
}
