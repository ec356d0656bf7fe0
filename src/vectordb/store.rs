use crate::chunker::Chunk;
use crate::embed::Fingerprint;
use crate::error::{Result, SyncError};
use arroy::distances::Cosine;
use arroy::{Database as ArroyDatabase, Reader, Writer};
use chrono::{DateTime, Utc};
use heed::byteorder::BigEndian;
use heed::types::*;
use heed::{Database, Env, EnvOpenOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const GENERATION_PREFIX: &str = "gen-";

type ChunkDb = Database<U32<BigEndian>, SerdeBincode<ChunkProvenance>>;

/// Where a vector came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    /// Vault-relative path of the source note
    pub path: String,
    /// Ordinal of the chunk within the note
    pub index: usize,
    /// Character offset of the chunk within the note
    pub offset: usize,
    pub content: String,
    pub links: Vec<String>,
    /// Hex fingerprint of the chunk text
    pub fingerprint: String,
}

impl ChunkProvenance {
    pub fn from_chunk(chunk: &Chunk, fingerprint: &Fingerprint) -> Self {
        Self {
            path: chunk.path.clone(),
            index: chunk.index,
            offset: chunk.offset,
            content: chunk.content.clone(),
            links: chunk.links.clone(),
            fingerprint: fingerprint.to_string(),
        }
    }
}

/// Describes one index generation on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub generation: String,
    pub provider: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

/// A vector with its provenance, as handed to the store
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub provenance: ChunkProvenance,
}

/// Vector index storage using arroy + heed (LMDB).
///
/// Every build writes a fresh generation directory `gen-<uuid>` holding its own LMDB
/// environment and `manifest.json`. Publishing rewrites the `CURRENT` pointer file by
/// atomic rename, then removes older generations. A failed build leaves `CURRENT`
/// untouched.
#[derive(Debug, Clone)]
pub struct VectorStore {
    root: PathBuf,
    map_size: usize,
}

impl VectorStore {
    pub fn new(root: impl Into<PathBuf>, map_size_mb: usize) -> Self {
        Self {
            root: root.into(),
            map_size: map_size_mb.max(1) * 1024 * 1024,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a new, unpublished generation from `entries`.
    ///
    /// Rejects vectors whose width differs from `dimensions`. On failure the staging
    /// directory is removed.
    pub fn build(
        &self,
        provider: &str,
        dimensions: usize,
        entries: Vec<IndexEntry>,
        document_count: usize,
    ) -> Result<PublishedIndex> {
        if dimensions == 0 {
            return Err(SyncError::Build("index dimensions must be positive".into()));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimensions) {
            return Err(SyncError::DimensionMismatch {
                expected: dimensions,
                actual: bad.vector.len(),
            });
        }
        if entries.len() > u32::MAX as usize {
            return Err(SyncError::Build(format!("too many chunks: {}", entries.len())));
        }

        std::fs::create_dir_all(&self.root).map_err(|e| SyncError::io(&self.root, e))?;

        let generation = format!("{}{}", GENERATION_PREFIX, uuid::Uuid::new_v4());
        let dir = self.root.join(&generation);
        let manifest = IndexManifest {
            generation,
            provider: provider.to_string(),
            dimensions,
            chunk_count: entries.len(),
            document_count,
            built_at: Utc::now(),
        };

        match self.write_generation(&dir, &manifest, entries) {
            Ok(index) => Ok(index),
            Err(err) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    warn!("Could not remove failed build {}: {}", dir.display(), cleanup);
                }
                Err(err)
            }
        }
    }

    fn write_generation(
        &self,
        dir: &Path,
        manifest: &IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<PublishedIndex> {
        std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

        debug!(
            "Building generation {} with {} vectors",
            manifest.generation, manifest.chunk_count
        );

        let env = self.open_env(dir)?;
        let mut wtxn = env.write_txn()?;
        let vectors: ArroyDatabase<Cosine> = env.create_database(&mut wtxn, Some("vectors"))?;
        let chunks: ChunkDb = env.create_database(&mut wtxn, Some("chunks"))?;

        let writer = Writer::new(vectors, 0, manifest.dimensions);
        for (id, entry) in entries.iter().enumerate() {
            let id = id as u32;
            writer.add_item(&mut wtxn, id, &entry.vector)?;
            chunks.put(&mut wtxn, &id, &entry.provenance)?;
        }

        if !entries.is_empty() {
            let mut rng = StdRng::seed_from_u64(rand::random());
            writer.builder(&mut rng).build(&mut wtxn)?;
        }
        wtxn.commit()?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| SyncError::Storage(format!("cannot encode manifest: {e}")))?;
        std::fs::write(&manifest_path, json).map_err(|e| SyncError::io(&manifest_path, e))?;

        Ok(PublishedIndex {
            env,
            vectors,
            chunks,
            manifest: manifest.clone(),
        })
    }

    /// Make `index` the current generation, then drop older generations from disk
    pub fn publish(&self, index: &PublishedIndex) -> Result<()> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        let current = self.root.join(CURRENT_FILE);

        std::fs::write(&tmp, &index.manifest.generation).map_err(|e| SyncError::io(&tmp, e))?;
        std::fs::rename(&tmp, &current).map_err(|e| SyncError::io(&current, e))?;

        info!(
            "Published index generation {} ({} chunks)",
            index.manifest.generation, index.manifest.chunk_count
        );

        self.remove_stale(&index.manifest);
        Ok(())
    }

    /// Remove finished generations built before `keep`. A directory without a
    /// manifest is still being written by some builder and is left alone, as is
    /// anything newer than `keep`.
    fn remove_stale(&self, keep: &IndexManifest) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(GENERATION_PREFIX) || name == keep.generation {
                continue;
            }

            let manifest = match read_manifest(&entry.path()) {
                Ok(manifest) => manifest,
                Err(err) => {
                    debug!("Leaving generation {} in place: {}", name, err);
                    continue;
                }
            };
            if manifest.built_at >= keep.built_at {
                continue;
            }

            if let Err(err) = std::fs::remove_dir_all(entry.path()) {
                warn!("Could not remove old index generation {}: {}", name, err);
            }
        }
    }

    /// Name of the published generation, if any
    pub fn current_generation(&self) -> Result<Option<String>> {
        let current = self.root.join(CURRENT_FILE);
        match std::fs::read_to_string(&current) {
            Ok(name) => Ok(Some(name.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SyncError::io(&current, err)),
        }
    }

    /// Open the published generation. `None` if nothing was ever published.
    ///
    /// A generation directory can only be opened once per process at a time.
    pub fn load(&self) -> Result<Option<PublishedIndex>> {
        let Some(generation) = self.current_generation()? else {
            return Ok(None);
        };
        let dir = self.root.join(&generation);

        let manifest = read_manifest(&dir)?;

        let env = self.open_env(&dir)?;
        let rtxn = env.read_txn()?;
        let vectors: ArroyDatabase<Cosine> = env
            .open_database(&rtxn, Some("vectors"))?
            .ok_or_else(|| SyncError::Storage(format!("{generation}: missing vectors database")))?;
        let chunks: ChunkDb = env
            .open_database(&rtxn, Some("chunks"))?
            .ok_or_else(|| SyncError::Storage(format!("{generation}: missing chunks database")))?;
        drop(rtxn);

        info!(
            "Loaded index generation {} ({} chunks from {} notes)",
            generation, manifest.chunk_count, manifest.document_count
        );

        Ok(Some(PublishedIndex {
            env,
            vectors,
            chunks,
            manifest,
        }))
    }

    fn open_env(&self, dir: &Path) -> Result<Env> {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(self.map_size)
                .max_dbs(4)
                .open(dir)?
        };
        Ok(env)
    }
}

fn read_manifest(dir: &Path) -> Result<IndexManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = std::fs::read(&path).map_err(|e| SyncError::io(&path, e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| SyncError::Storage(format!("invalid manifest {}: {e}", path.display())))
}

/// An immutable, queryable index generation
pub struct PublishedIndex {
    env: Env,
    vectors: ArroyDatabase<Cosine>,
    chunks: ChunkDb,
    manifest: IndexManifest,
}

impl PublishedIndex {
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn generation(&self) -> &str {
        &self.manifest.generation
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }

    pub fn len(&self) -> usize {
        self.manifest.chunk_count
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.chunk_count == 0
    }

    /// `k` nearest chunks to `vector`, best (smallest distance) first
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkProvenance, f32)>> {
        if vector.len() != self.manifest.dimensions {
            return Err(SyncError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: vector.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        let reader = Reader::open(&rtxn, 0, self.vectors)?;

        let mut query = reader.nns(k);
        // Explore more candidates than asked for
        if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
            if let Some(search_k) = NonZeroUsize::new(k * n_trees.get() * 15) {
                query.search_k(search_k);
            }
        }
        let neighbours = query.by_vector(&rtxn, vector)?;

        let mut results = Vec::with_capacity(neighbours.len());
        for (id, distance) in neighbours {
            match self.chunks.get(&rtxn, &id)? {
                Some(provenance) => results.push((provenance, distance)),
                None => warn!("Vector {} has no provenance in {}", id, self.generation()),
            }
        }

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }
}

impl std::fmt::Debug for PublishedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedIndex")
            .field("manifest", &self.manifest)
            .finish()
    }
}
