use super::{validate_vectors, EmbeddingProvider};
use crate::error::{ProviderError, Result, SyncError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Available local embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelType {
    /// BGE Small EN v1.5 - 384 dimensions, good balance of speed/quality
    #[default]
    BGESmallENV15,
    /// All-MiniLM-L6-v2 - 384 dimensions, fast and efficient
    AllMiniLML6V2,
    /// BGE Base EN v1.5 - 768 dimensions, higher quality
    BGEBaseENV15,
    /// Multilingual E5 small - 384 dimensions, for mixed-language vaults
    MultilingualE5Small,
}

impl ModelType {
    pub fn to_fastembed_model(&self) -> FastEmbedModel {
        match self {
            Self::BGESmallENV15 => FastEmbedModel::BGESmallENV15,
            Self::AllMiniLML6V2 => FastEmbedModel::AllMiniLML6V2,
            Self::BGEBaseENV15 => FastEmbedModel::BGEBaseENV15,
            Self::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::BGESmallENV15 => 384,
            Self::AllMiniLML6V2 => 384,
            Self::BGEBaseENV15 => 768,
            Self::MultilingualE5Small => 384,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BGESmallENV15 => "BAAI/bge-small-en-v1.5",
            Self::AllMiniLML6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BGEBaseENV15 => "BAAI/bge-base-en-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Resolve a configured model name. Accepts the full name or its last path segment;
    /// the OpenAI default model name maps to the default local model.
    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: [ModelType; 4] = [
            ModelType::BGESmallENV15,
            ModelType::AllMiniLML6V2,
            ModelType::BGEBaseENV15,
            ModelType::MultilingualE5Small,
        ];

        if name.is_empty() || name.starts_with("text-embedding-") {
            return Some(Self::default());
        }
        let wanted = name.to_lowercase();
        ALL.into_iter().find(|m| {
            let full = m.name().to_lowercase();
            full == wanted || full.rsplit('/').next() == Some(wanted.as_str())
        })
    }
}

/// Local ONNX embedding via fastembed. Inference is CPU bound and runs on the
/// blocking pool.
pub struct FastEmbedProvider {
    id: String,
    model: Arc<Mutex<TextEmbedding>>,
    model_type: ModelType,
}

impl FastEmbedProvider {
    pub fn new() -> Result<Self> {
        Self::with_model(ModelType::default())
    }

    pub fn with_model(model_type: ModelType) -> Result<Self> {
        info!(
            "Loading embedding model: {} ({} dims)",
            model_type.name(),
            model_type.dimensions()
        );

        let model = TextEmbedding::try_new(
            InitOptions::new(model_type.to_fastembed_model()).with_show_download_progress(false),
        )
        .map_err(|e| SyncError::Config(format!("failed to initialize embedding model: {e}")))?;

        info!("Model loaded");

        Ok(Self {
            id: format!("fastembed/{}", model_type.name()),
            model: Arc::new(Mutex::new(model)),
            model_type,
        })
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let owned = texts.to_vec();
        let id = self.id.clone();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ProviderError::new(&id, "embedding model lock poisoned"))?;
            model
                .embed(owned, None)
                .map_err(|e| ProviderError::new(&id, format!("failed to generate embeddings: {e}")))
        })
        .await
        .map_err(|e| ProviderError::new(&self.id, format!("embedding task panicked: {e}")))??;

        validate_vectors(&self.id, texts.len(), self.dimensions(), &vectors)?;
        Ok(vectors)
    }
}
