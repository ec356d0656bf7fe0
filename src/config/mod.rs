use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the watched vault root
pub const VAULT_PATH_ENV: &str = "OBSIDIAN_VAULT_PATH";

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "VAULTSYNC_CONFIG";

/// Value shipped in templates; treated as "not configured"
pub const PLACEHOLDER_VAULT_PATH: &str = "/path/to/your/vault";

/// Global configuration for vaultsync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for cache and index data
    pub data_dir: PathBuf,

    pub vault: VaultConfig,

    pub chunking: ChunkingConfig,

    pub embedding: EmbeddingConfig,

    pub watch: WatchConfig,

    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault root (overridden by `OBSIDIAN_VAULT_PATH`)
    pub root: PathBuf,

    /// Tracked file extensions, without the dot
    pub extensions: Vec<String>,

    /// Folder under the vault root that receives saved dialogues
    pub memo_base: String,

    /// Dialogue folder used when the caller does not name one
    pub default_dialogue_folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum span size in code points
    pub max_chars: usize,

    /// Overlap between adjacent spans in code points
    pub overlap: usize,

    /// Split separators, highest priority first
    pub separators: Vec<String>,

    /// Attach `[[wiki link]]` targets to chunk metadata
    pub extract_links: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI embeddings API
    OpenAi,
    /// Local ONNX inference via fastembed
    Local,
    /// Deterministic offline feature hashing
    Hash,
}

impl std::str::FromStr for ProviderKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" | "fastembed" => Ok(Self::Local),
            "hash" => Ok(Self::Hash),
            other => Err(SyncError::Config(format!(
                "unknown embedding provider '{other}' (expected openai, local or hash)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,

    /// Model name (provider specific)
    pub model: String,

    /// Vector dimensionality; only consulted by providers that allow choosing it
    pub dimensions: usize,

    /// Texts per provider request
    pub batch_size: usize,

    /// HTTP timeout for remote providers
    pub timeout_secs: u64,

    /// Retries for rate limits and server errors
    pub max_retries: u32,

    /// In-memory query embedding cache capacity
    pub query_cache_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet interval before a burst of changes triggers a rebuild
    pub quiet_interval_ms: u64,

    /// Bounded channel between the OS watcher and the debounce task
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// LMDB map size for each index generation, in MB
    pub map_size_mb: usize,

    /// LMDB map size for the embedding cache, in MB
    pub cache_map_size_mb: usize,
}

impl Config {
    /// Load configuration from `$VAULTSYNC_CONFIG`, `<data_dir>/config.toml`, or defaults,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let path = explicit.unwrap_or_else(|| default_data_dir().join("config.toml"));

        let mut config = if path.is_file() {
            debug!("Loading config from {}", path.display());
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Some(root) = std::env::var_os(VAULT_PATH_ENV) {
            config.vault.root = PathBuf::from(root);
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        toml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Validated vault root
    /// Validated vault root, canonicalized so it matches watcher event paths
    pub fn vault_root(&self) -> Result<PathBuf> {
        let root = &self.vault.root;
        if root.as_os_str().is_empty() || root == Path::new(PLACEHOLDER_VAULT_PATH) {
            return Err(SyncError::Config(format!(
                "vault path is not configured; set {VAULT_PATH_ENV} or vault.root in config.toml"
            )));
        }
        if !root.is_dir() {
            return Err(SyncError::Config(format!(
                "vault path {} does not exist or is not a directory",
                root.display()
            )));
        }
        root.canonicalize().map_err(|e| SyncError::io(root, e))
    }

    /// Get the data directory, creating it if necessary
    pub fn data_dir(&self) -> Result<PathBuf> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir).map_err(|e| SyncError::io(&self.data_dir, e))?;
        }
        Ok(self.data_dir.clone())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.watch.quiet_interval_ms)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".vaultsync"))
        .unwrap_or_else(|| PathBuf::from(".vaultsync"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vault: VaultConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            watch: WatchConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(PLACEHOLDER_VAULT_PATH),
            extensions: vec!["md".to_string()],
            memo_base: "000_Slipbox".to_string(),
            default_dialogue_folder: "ai_dialogues".to_string(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap: 100,
            separators: crate::chunker::DEFAULT_SEPARATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extract_links: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            timeout_secs: 60,
            max_retries: 5,
            query_cache_entries: 1024,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_interval_ms: 2000,
            channel_capacity: 1024,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            map_size_mb: 1024,
            cache_map_size_mb: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_placeholder_root_is_config_error() {
        let config = Config::default();
        let err = config.vault_root().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let mut config = Config::default();
        config.vault.root = PathBuf::from("/definitely/not/a/vault/here");
        assert!(matches!(config.vault_root(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_existing_root_is_accepted() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.vault.root = dir.path().to_path_buf();
        assert_eq!(config.vault_root().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_is_resolved() {
        let dir = tempdir().unwrap();
        let vault = dir.path().join("vault");
        std::fs::create_dir(&vault).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&vault, &link).unwrap();

        let mut config = Config::default();
        config.vault.root = link.join(".");

        let root = config.vault_root().unwrap();
        assert_eq!(root, vault.canonicalize().unwrap());
        assert!(!root.ends_with("link"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[embedding]\nprovider = \"hash\"\ndimensions = 64\n\n[watch]\nquiet_interval_ms = 500\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.embedding.provider, ProviderKind::Hash);
        assert_eq!(config.embedding.dimensions, 64);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.quiet_interval(), Duration::from_millis(500));
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.chunking.overlap, 100);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("fastembed".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!("nope".parse::<ProviderKind>().is_err());
    }
}
