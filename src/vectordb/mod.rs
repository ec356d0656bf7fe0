mod store;

pub use store::{ChunkProvenance, IndexEntry, IndexManifest, PublishedIndex, VectorStore};
