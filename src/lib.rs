pub mod cache;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod document;
pub mod embed;
pub mod error;
pub mod file;
pub mod index;
pub mod mcp;
pub mod search;
pub mod server;
pub mod vault;
pub mod vectordb;
pub mod watch;

// Re-export commonly used types
pub use chunker::{Chunk, Chunker};
pub use config::Config;
pub use document::Document;
pub use embed::{EmbeddingCache, EmbeddingProvider, Fingerprint, SharedProvider};
pub use error::{Result, SyncError};
pub use file::{NoteFile, NoteWalker, WalkStats};
pub use index::{BuildStats, IndexBuilder};
pub use search::{SearchEngine, SearchMode};
pub use server::{SyncDaemon, SyncStatus};
pub use vault::Vault;
pub use vectordb::{PublishedIndex, VectorStore};
