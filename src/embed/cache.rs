use super::{validate_vectors, Fingerprint, SharedProvider};
use crate::error::{Result, SyncError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const MAX_PROVIDER_DBS: u32 = 32;

/// Durable fingerprint -> vector cache (LMDB via heed).
///
/// One named database per provider id, so switching providers never serves vectors
/// computed by another model. Entries are only ever added; a fingerprint that has been
/// stored is never embedded again for as long as the directory exists.
pub struct EmbeddingCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    provider: SharedProvider,
    batch_size: usize,
    path: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
    embedded: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
    pub embedded: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl EmbeddingCache {
    /// Open (or create) the cache under `dir` for `provider`
    pub fn open(
        dir: &Path,
        provider: SharedProvider,
        batch_size: usize,
        map_size_mb: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb.max(1) * 1024 * 1024)
                .max_dbs(MAX_PROVIDER_DBS)
                .open(dir)?
        };

        let name = format!("embeddings:{}", provider.id());
        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(&name))?;
        wtxn.commit()?;

        let cache = Self {
            env,
            db,
            provider,
            batch_size: batch_size.max(1),
            path: dir.to_path_buf(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            embedded: AtomicU64::new(0),
        };

        info!(
            "Embedding cache opened at {} ({} entries for {})",
            cache.path.display(),
            cache.len()?,
            cache.provider.id()
        );
        Ok(cache)
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        Fingerprint::compute(self.provider.id(), text)
    }

    /// Look up a stored vector
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<f32>>> {
        let rtxn = self.env.read_txn()?;
        let bytes = self.db.get(&rtxn, &fingerprint.as_bytes()[..])?;
        Ok(bytes.and_then(|b| decode_vector(b, self.dimensions())))
    }

    /// Store a vector unless the fingerprint is already present
    pub fn put(&self, fingerprint: &Fingerprint, vector: &[f32]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let key = &fingerprint.as_bytes()[..];
        if self.db.get(&wtxn, key)?.is_none() {
            self.db.put(&mut wtxn, key, &encode_vector(vector))?;
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Number of entries stored for this provider
    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// One vector per input, in input order. Misses are deduplicated, embedded in
    /// batches of at most `batch_size`, and each batch is committed in its own write
    /// transaction. A failing batch fails the whole call and commits nothing for that
    /// batch; earlier batches stay cached.
    pub async fn resolve(
        &self,
        fingerprints: &[Fingerprint],
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        if fingerprints.len() != texts.len() {
            return Err(SyncError::Build(format!(
                "{} fingerprints for {} texts",
                fingerprints.len(),
                texts.len()
            )));
        }

        let mut resolved = self.lookup(fingerprints)?;

        // Distinct misses in first-seen order
        let mut miss_fingerprints = Vec::new();
        let mut miss_texts = Vec::new();
        let mut seen = HashSet::new();
        for (i, slot) in resolved.iter().enumerate() {
            if slot.is_none() && seen.insert(fingerprints[i]) {
                miss_fingerprints.push(fingerprints[i]);
                miss_texts.push(texts[i].clone());
            }
        }

        let hit_count = resolved.iter().filter(|v| v.is_some()).count();
        self.hits.fetch_add(hit_count as u64, Ordering::Relaxed);
        self.misses
            .fetch_add((resolved.len() - hit_count) as u64, Ordering::Relaxed);

        if miss_fingerprints.is_empty() {
            debug!("All {} vectors served from cache", fingerprints.len());
            return collect_resolved(resolved);
        }

        debug!(
            "{} cache hits, {} distinct misses to embed",
            hit_count,
            miss_fingerprints.len()
        );

        let mut fresh: HashMap<Fingerprint, Vec<f32>> =
            HashMap::with_capacity(miss_fingerprints.len());
        for (batch_fps, batch_texts) in miss_fingerprints
            .chunks(self.batch_size)
            .zip(miss_texts.chunks(self.batch_size))
        {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            let vectors = self.provider.embed(batch_texts).await?;
            validate_vectors(
                self.provider.id(),
                batch_texts.len(),
                self.dimensions(),
                &vectors,
            )?;

            self.store_batch(batch_fps, &vectors)?;
            self.embedded
                .fetch_add(batch_texts.len() as u64, Ordering::Relaxed);

            fresh.extend(batch_fps.iter().copied().zip(vectors));
        }

        for (slot, fingerprint) in resolved.iter_mut().zip(fingerprints) {
            if slot.is_none() {
                *slot = fresh.get(fingerprint).cloned();
            }
        }

        collect_resolved(resolved)
    }

    fn lookup(&self, fingerprints: &[Fingerprint]) -> Result<Vec<Option<Vec<f32>>>> {
        let rtxn = self.env.read_txn()?;
        let dims = self.dimensions();
        let mut out = Vec::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            let bytes = self.db.get(&rtxn, &fingerprint.as_bytes()[..])?;
            out.push(bytes.and_then(|b| decode_vector(b, dims)));
        }
        Ok(out)
    }

    fn store_batch(&self, fingerprints: &[Fingerprint], vectors: &[Vec<f32>]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for (fingerprint, vector) in fingerprints.iter().zip(vectors) {
            self.db
                .put(&mut wtxn, &fingerprint.as_bytes()[..], &encode_vector(vector))?;
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            embedded: self.embedded.load(Ordering::Relaxed),
        }
    }
}

fn collect_resolved(resolved: Vec<Option<Vec<f32>>>) -> Result<Vec<Vec<f32>>> {
    resolved
        .into_iter()
        .map(|v| v.ok_or_else(|| SyncError::Build("embedding missing after resolve".into())))
        .collect()
}

/// Little-endian f32 bytes
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// `None` for entries whose width does not match, which are then re-embedded
fn decode_vector(bytes: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimensions * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::CountingProvider;
    use crate::embed::HashProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fingerprints(cache: &EmbeddingCache, texts: &[String]) -> Vec<Fingerprint> {
        texts.iter().map(|t| cache.fingerprint(t)).collect()
    }

    #[tokio::test]
    async fn test_cache_hit_law() {
        let dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(16);
        let cache = EmbeddingCache::open(dir.path(), provider.clone(), 100, 16).unwrap();

        let input = texts(&["alpha", "beta", "alpha"]);
        let fps = fingerprints(&cache, &input);

        let first = cache.resolve(&fps, &input).await.unwrap();
        let second = cache.resolve(&fps, &input).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_durable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let input = texts(&["one", "two"]);

        let first = {
            let provider = CountingProvider::new(8);
            let cache = EmbeddingCache::open(dir.path(), provider.clone(), 100, 16).unwrap();
            let fps = fingerprints(&cache, &input);
            let out = cache.resolve(&fps, &input).await.unwrap();
            assert_eq!(provider.calls(), 1);
            out
        };

        let provider = CountingProvider::new(8);
        let cache = EmbeddingCache::open(dir.path(), provider.clone(), 100, 16).unwrap();
        let fps = fingerprints(&cache, &input);
        let again = cache.resolve(&fps, &input).await.unwrap();

        assert_eq!(provider.calls(), 0);
        assert_eq!(again, first);
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_batches_respect_size() {
        let dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(4);
        let cache = EmbeddingCache::open(dir.path(), provider.clone(), 2, 16).unwrap();

        let input = texts(&["a", "b", "c", "d", "e"]);
        let fps = fingerprints(&cache, &input);
        let out = cache.resolve(&fps, &input).await.unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!(provider.calls(), 3);
        assert_eq!(cache.stats().provider_calls, 3);
    }

    #[tokio::test]
    async fn test_failed_batch_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(4);
        let cache = EmbeddingCache::open(dir.path(), provider.clone(), 100, 16).unwrap();

        provider.set_failing(true);
        let input = texts(&["x", "y"]);
        let fps = fingerprints(&cache, &input);
        let err = cache.resolve(&fps, &input).await.unwrap_err();

        assert!(matches!(err, SyncError::Provider(_)));
        assert!(cache.is_empty().unwrap());

        provider.set_failing(false);
        cache.resolve(&fps, &input).await.unwrap();
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_providers_are_namespaced() {
        let dir = TempDir::new().unwrap();
        let input = texts(&["shared text"]);

        {
            let cache =
                EmbeddingCache::open(dir.path(), Arc::new(HashProvider::new(8)), 100, 16).unwrap();
            let fps = fingerprints(&cache, &input);
            cache.resolve(&fps, &input).await.unwrap();
        }

        let provider = CountingProvider::new(16);
        let cache = EmbeddingCache::open(dir.path(), provider.clone(), 100, 16).unwrap();
        assert!(cache.is_empty().unwrap());
        let fps = fingerprints(&cache, &input);
        let out = cache.resolve(&fps, &input).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(out[0].len(), 16);
    }

    #[test]
    fn test_get_put() {
        let dir = TempDir::new().unwrap();
        let cache =
            EmbeddingCache::open(dir.path(), Arc::new(HashProvider::new(3)), 100, 16).unwrap();
        let fp = cache.fingerprint("note");

        assert_eq!(cache.get(&fp).unwrap(), None);
        cache.put(&fp, &[1.0, 2.0, 3.0]).unwrap();
        cache.put(&fp, &[9.0, 9.0, 9.0]).unwrap();
        assert_eq!(cache.get(&fp).unwrap(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_vector_codec() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v), 3), Some(v));
        assert_eq!(decode_vector(&[0u8; 8], 3), None);
    }
}
