use crate::chunker::{Chunk, Chunker};
use crate::config::Config;
use crate::document::Document;
use crate::embed::{EmbeddingCache, Fingerprint, SharedProvider};
use crate::error::{Result, SyncError};
use crate::vectordb::{ChunkProvenance, IndexEntry, PublishedIndex, VectorStore};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What one build did
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub generation: String,
    pub documents: usize,
    pub chunks: usize,
    pub skipped_blank: usize,
    /// Chunks whose vector came from the cache
    pub cache_hits: u64,
    /// Texts sent to the embedding provider
    pub embedded: u64,
    pub chunking: Duration,
    pub embedding: Duration,
    pub storage: Duration,
}

impl BuildStats {
    pub fn total(&self) -> Duration {
        self.chunking + self.embedding + self.storage
    }
}

/// Full-rebuild index pipeline: links, chunks, fingerprints, cache-aware embedding,
/// vector index construction and atomic publish.
///
/// Every build starts from the complete document set. Unchanged chunks cost a cache
/// lookup, not a provider call.
pub struct IndexBuilder {
    cache: Arc<EmbeddingCache>,
    store: VectorStore,
    chunker: Chunker,
    extract_links: bool,
}

impl IndexBuilder {
    pub fn new(
        cache: Arc<EmbeddingCache>,
        store: VectorStore,
        chunker: Chunker,
        extract_links: bool,
    ) -> Self {
        Self {
            cache,
            store,
            chunker,
            extract_links,
        }
    }

    /// Open the embedding cache and index store under the configured data directory
    pub fn from_config(config: &Config, provider: SharedProvider) -> Result<Self> {
        let cache = EmbeddingCache::open(
            &config.cache_dir(),
            provider,
            config.embedding.batch_size,
            config.index.cache_map_size_mb,
        )?;
        let store = VectorStore::new(config.index_dir(), config.index.map_size_mb);
        let chunker = Chunker::from_config(&config.chunking)?;

        Ok(Self::new(
            Arc::new(cache),
            store,
            chunker,
            config.chunking.extract_links,
        ))
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn provider(&self) -> &SharedProvider {
        self.cache.provider()
    }

    /// Build a fresh index from `documents` and publish it.
    ///
    /// On error nothing is published and the previous generation stays current.
    pub async fn build(
        &self,
        documents: Vec<Document>,
    ) -> Result<(Arc<PublishedIndex>, BuildStats)> {
        let mut stats = BuildStats {
            documents: documents.len(),
            ..BuildStats::default()
        };

        // 1. Links and chunks, per document in parallel
        let start = Instant::now();
        let chunks = self.chunk_documents(documents);
        let total_chunks = chunks.len();
        let chunks: Vec<Chunk> = chunks.into_iter().filter(|c| !c.is_blank()).collect();
        stats.skipped_blank = total_chunks - chunks.len();
        stats.chunks = chunks.len();
        stats.chunking = start.elapsed();

        debug!(
            "Chunked {} notes into {} chunks in {:?}",
            stats.documents, stats.chunks, stats.chunking
        );

        // 2. Fingerprints and one cache-aware resolve for the whole batch
        let start = Instant::now();
        let fingerprints: Vec<Fingerprint> = chunks
            .iter()
            .map(|c| self.cache.fingerprint(&c.content))
            .collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let before = self.cache.stats();
        let vectors = self.cache.resolve(&fingerprints, &texts).await?;
        let after = self.cache.stats();
        stats.cache_hits = after.hits - before.hits;
        stats.embedded = after.embedded - before.embedded;
        stats.embedding = start.elapsed();

        // 3. Vector index construction and publish
        let start = Instant::now();
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(&fingerprints)
            .zip(vectors)
            .map(|((chunk, fingerprint), vector)| IndexEntry {
                vector,
                provenance: ChunkProvenance::from_chunk(chunk, fingerprint),
            })
            .collect();

        let store = self.store.clone();
        let provider = self.cache.provider_id().to_string();
        let dimensions = self.cache.dimensions();
        let document_count = stats.documents;

        let index = tokio::task::spawn_blocking(move || {
            let index = store.build(&provider, dimensions, entries, document_count)?;
            store.publish(&index)?;
            Ok::<_, SyncError>(index)
        })
        .await
        .map_err(|e| SyncError::Build(format!("index build task failed: {e}")))??;

        stats.storage = start.elapsed();
        stats.generation = index.generation().to_string();

        info!(
            "Index rebuilt: {} notes, {} chunks, {} embedded, {} cached in {:?}",
            stats.documents,
            stats.chunks,
            stats.embedded,
            stats.cache_hits,
            stats.total()
        );

        Ok((Arc::new(index), stats))
    }

    fn chunk_documents(&self, documents: Vec<Document>) -> Vec<Chunk> {
        let extract_links = self.extract_links;
        let chunker = &self.chunker;

        documents
            .into_par_iter()
            .map(|doc| {
                let doc = if extract_links { doc.with_links() } else { doc };
                chunker.chunk_document(&doc)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}
