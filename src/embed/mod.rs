mod cache;
mod embedder;
mod fingerprint;
mod hash;
mod openai;

pub use cache::{CacheStats, EmbeddingCache};
pub use embedder::{FastEmbedProvider, ModelType};
pub use fingerprint::Fingerprint;
pub use hash::HashProvider;
pub use openai::OpenAiProvider;

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{ProviderError, Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;

/// Text to fixed-dimension vector. Implementations may be remote, rate limited and fallible.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier; part of every fingerprint and cache namespace
    fn id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::new(self.id(), "no embedding returned"))
    }
}

pub type SharedProvider = Arc<dyn EmbeddingProvider>;

/// Build the configured provider
pub fn create_provider(config: &EmbeddingConfig) -> Result<SharedProvider> {
    let provider: SharedProvider = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Local => {
            let model = ModelType::from_name(&config.model).ok_or_else(|| {
                SyncError::Config(format!("unknown local embedding model '{}'", config.model))
            })?;
            Arc::new(FastEmbedProvider::with_model(model)?)
        }
        ProviderKind::Hash => Arc::new(HashProvider::new(config.dimensions)),
    };
    Ok(provider)
}

/// Check that a provider returned one vector of the expected width per input
pub(crate) fn validate_vectors(
    provider: &str,
    expected_count: usize,
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> std::result::Result<(), ProviderError> {
    if vectors.len() != expected_count {
        return Err(ProviderError::new(
            provider,
            format!("expected {} vectors, got {}", expected_count, vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(ProviderError::new(
            provider,
            format!("expected {}-dimensional vectors, got {}", dimensions, bad.len()),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hash_provider() {
        let config = EmbeddingConfig {
            provider: ProviderKind::Hash,
            dimensions: 32,
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.id(), "hash/32");
        assert_eq!(provider.dimensions(), 32);
    }

    #[test]
    fn test_unknown_local_model() {
        let config = EmbeddingConfig {
            provider: ProviderKind::Local,
            model: "not-a-model".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_provider(&config), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_vectors() {
        assert!(validate_vectors("p", 2, 3, &[vec![0.0; 3], vec![0.0; 3]]).is_ok());
        assert!(validate_vectors("p", 2, 3, &[vec![0.0; 3]]).is_err());
        assert!(validate_vectors("p", 1, 3, &[vec![0.0; 4]]).is_err());
    }

    #[tokio::test]
    async fn test_embed_one_default() {
        let provider = HashProvider::new(16);
        let v = provider.embed_one("hello").await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
