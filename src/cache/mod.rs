use crate::embed::SharedProvider;
use crate::error::Result;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory cache of query embeddings, keyed by (provider id, query text)
pub struct QueryCache {
    cache: Cache<(String, String), Arc<Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries.max(1)).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached vector for `query`, embedding it with `provider` on a miss
    pub async fn embed_query(
        &self,
        provider: &SharedProvider,
        query: &str,
    ) -> Result<Arc<Vec<f32>>> {
        let key = (provider.id().to_string(), query.to_string());

        if let Some(value) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(provider.embed_one(query).await?);
        self.cache.insert(key, Arc::clone(&value));
        Ok(value)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::CountingProvider;

    #[tokio::test]
    async fn test_repeat_query_hits_cache() {
        let provider = CountingProvider::new(8);
        let shared: SharedProvider = provider.clone();
        let cache = QueryCache::new(16);

        let a = cache.embed_query(&shared, "brown fox").await.unwrap();
        let b = cache.embed_query(&shared, "brown fox").await.unwrap();
        cache.embed_query(&shared, "other").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(provider.calls(), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let provider = CountingProvider::new(8);
        let shared: SharedProvider = provider.clone();
        let cache = QueryCache::new(16);

        provider.set_failing(true);
        assert!(cache.embed_query(&shared, "q").await.is_err());
        provider.set_failing(false);
        assert!(cache.embed_query(&shared, "q").await.is_ok());
        assert_eq!(provider.calls(), 2);
    }
}
