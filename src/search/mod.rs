use crate::cache::QueryCache;
use crate::embed::SharedProvider;
use crate::error::{Result, SyncError};
use crate::file::NoteWalker;
use crate::vectordb::PublishedIndex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Characters of context kept before and after a lexical match
const SNIPPET_BEFORE: usize = 50;
const SNIPPET_AFTER: usize = 100;

/// Characters of chunk content shown for a semantic hit
const SEMANTIC_PREVIEW: usize = 200;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Case-insensitive substring scan over the vault
    Lexical,
    /// Nearest neighbours in the published index
    Semantic,
    /// Semantic, falling back to lexical when no index or provider is available
    #[default]
    Auto,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Vault-relative path of the note
    pub path: String,
    pub snippet: String,
    /// Cosine distance, semantic hits only
    pub distance: Option<f32>,
    /// Chunk ordinal within the note, semantic hits only
    pub chunk: Option<usize>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    /// Mode that produced the hits (never `Auto`)
    pub mode: SearchMode,
    pub hits: Vec<SearchHit>,
    /// Why `Auto` fell back to lexical search
    pub fallback_reason: Option<String>,
}

impl SearchResults {
    /// Plain-text rendering used by the tool surface
    pub fn render(&self) -> String {
        if self.hits.is_empty() {
            return format!("No notes matched '{}'.", self.query);
        }

        let mut out = String::new();
        if let Some(reason) = &self.fallback_reason {
            let _ = writeln!(
                out,
                "(semantic search unavailable: {reason}; showing lexical matches)"
            );
        }
        let _ = writeln!(out, "Search results ({}):", self.mode);

        for hit in &self.hits {
            match (hit.distance, hit.chunk) {
                (Some(distance), Some(chunk)) => {
                    let _ = writeln!(
                        out,
                        "- **{}** (chunk {}, distance {:.4})",
                        hit.path, chunk, distance
                    );
                }
                _ => {
                    let _ = writeln!(out, "- **{}**", hit.path);
                }
            }
            if !hit.snippet.is_empty() {
                let _ = writeln!(out, "  - {}", hit.snippet);
            }
            if !hit.links.is_empty() {
                let _ = writeln!(out, "  - links: {}", hit.links.join(", "));
            }
        }

        out.trim_end().to_string()
    }
}

/// Read-only search over the vault and the current published index
pub struct SearchEngine {
    walker: NoteWalker,
    provider: SharedProvider,
    index: watch::Receiver<Option<Arc<PublishedIndex>>>,
    queries: QueryCache,
}

impl SearchEngine {
    pub fn new(
        walker: NoteWalker,
        provider: SharedProvider,
        index: watch::Receiver<Option<Arc<PublishedIndex>>>,
        query_cache_entries: u64,
    ) -> Self {
        Self {
            walker,
            provider,
            index,
            queries: QueryCache::new(query_cache_entries),
        }
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.queries
    }

    /// Current snapshot; the borrow is released before returning
    fn snapshot(&self) -> Option<Arc<PublishedIndex>> {
        self.index.borrow().clone()
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        mode: SearchMode,
    ) -> Result<SearchResults> {
        match mode {
            SearchMode::Lexical => self.lexical_results(query, limit, None).await,
            SearchMode::Semantic => self.semantic(query, limit).await,
            SearchMode::Auto => match self.semantic(query, limit).await {
                Ok(results) => Ok(results),
                Err(err @ (SyncError::IndexUnavailable | SyncError::Provider(_))) => {
                    debug!("Falling back to lexical search: {}", err);
                    self.lexical_results(query, limit, Some(err.to_string())).await
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Nearest chunks to `query`, best match first
    pub async fn semantic(&self, query: &str, limit: usize) -> Result<SearchResults> {
        let index = self.snapshot().ok_or(SyncError::IndexUnavailable)?;
        let vector = self.queries.embed_query(&self.provider, query).await?;

        let hits = tokio::task::spawn_blocking(move || index.query(&vector, limit))
            .await
            .map_err(|e| SyncError::Storage(format!("query task failed: {e}")))??
            .into_iter()
            .map(|(provenance, distance)| SearchHit {
                snippet: preview(&provenance.content, SEMANTIC_PREVIEW),
                path: provenance.path,
                distance: Some(distance),
                chunk: Some(provenance.index),
                links: provenance.links,
            })
            .collect();

        Ok(SearchResults {
            query: query.to_string(),
            mode: SearchMode::Semantic,
            hits,
            fallback_reason: None,
        })
    }

    async fn lexical_results(
        &self,
        query: &str,
        limit: usize,
        fallback_reason: Option<String>,
    ) -> Result<SearchResults> {
        let walker = self.walker.clone();
        let needle = query.to_string();
        let hits = tokio::task::spawn_blocking(move || lexical_search(&walker, &needle, limit))
            .await
            .map_err(|e| SyncError::Storage(format!("lexical search task failed: {e}")))?;

        Ok(SearchResults {
            query: query.to_string(),
            mode: SearchMode::Lexical,
            hits,
            fallback_reason,
        })
    }
}

/// Scan tracked notes in walk order, matching `query` case-insensitively against
/// content or file name. Unreadable files are logged and skipped.
pub fn lexical_search(walker: &NoteWalker, query: &str, limit: usize) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    let mut hits = Vec::new();

    for note in walker.notes() {
        if hits.len() >= limit {
            break;
        }

        let content = match std::fs::read_to_string(&note.path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Skipping {}: {}", note.path.display(), err);
                continue;
            }
        };

        let name = note
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let lowered = content.to_lowercase();

        let position = lowered.find(&needle);
        if position.is_none() && !name.contains(&needle) {
            continue;
        }

        let snippet = position
            .map(|byte| snippet_around(&content, original_char_offset(&content, byte)))
            .unwrap_or_default();

        hits.push(SearchHit {
            path: note.relative,
            snippet,
            distance: None,
            chunk: None,
            links: Vec::new(),
        });
    }

    hits
}

/// Character index in `content` of the char whose lowercase form covers byte
/// `lowered_byte` of `content.to_lowercase()`
fn original_char_offset(content: &str, lowered_byte: usize) -> usize {
    let mut consumed = 0;
    for (index, c) in content.chars().enumerate() {
        if consumed >= lowered_byte {
            return index;
        }
        consumed += c.to_lowercase().map(char::len_utf8).sum::<usize>();
        if consumed > lowered_byte {
            return index;
        }
    }
    content.chars().count()
}

/// Context window around the character at `pos`, newlines flattened
fn snippet_around(content: &str, pos: usize) -> String {
    let total = content.chars().count();
    let start = pos.saturating_sub(SNIPPET_BEFORE);
    let end = (pos + SNIPPET_AFTER).min(total);

    let mut snippet: String = content
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();

    if start > 0 {
        snippet.insert_str(0, "...");
    }
    if end < total {
        snippet.push_str("...");
    }
    snippet
}

fn preview(content: &str, max: usize) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    let flat = flat.trim();

    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    } else {
        flat.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::document::load_all;
    use crate::embed::testing::CountingProvider;
    use crate::embed::EmbeddingCache;
    use crate::file::NoteFilter;
    use crate::index::IndexBuilder;
    use crate::vectordb::VectorStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn walker(root: &std::path::Path) -> NoteWalker {
        NoteWalker::new(NoteFilter::new(root, &["md".to_string()]))
    }

    fn engine(
        vault: &TempDir,
        index: Option<Arc<PublishedIndex>>,
        provider: SharedProvider,
    ) -> (SearchEngine, watch::Sender<Option<Arc<PublishedIndex>>>) {
        let (tx, rx) = watch::channel(index);
        (SearchEngine::new(walker(vault.path()), provider, rx, 16), tx)
    }

    #[test]
    fn test_lexical_finds_brown_fox() {
        let vault = TempDir::new().unwrap();
        std::fs::create_dir(vault.path().join("notes")).unwrap();
        std::fs::write(vault.path().join("notes/a.md"), "the quick brown fox").unwrap();
        std::fs::write(vault.path().join("other.md"), "nothing relevant").unwrap();

        let hits = lexical_search(&walker(vault.path()), "brown", 10);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "notes/a.md");
        assert!(hits[0].snippet.contains("brown"));
    }

    #[test]
    fn test_lexical_matches_file_name_and_respects_limit() {
        let vault = TempDir::new().unwrap();
        std::fs::write(vault.path().join("Recipes.md"), "flour and water").unwrap();
        for i in 0..5 {
            std::fs::write(vault.path().join(format!("n{i}.md")), "RECIPE notes").unwrap();
        }

        let by_name = lexical_search(&walker(vault.path()), "recipes", 10);
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].path, "Recipes.md");
        assert_eq!(by_name[0].snippet, "");

        let limited = lexical_search(&walker(vault.path()), "recipe", 3);
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn test_snippet_window_and_ellipses() {
        let content = format!("{}needle\n{}", "a".repeat(60), "b".repeat(200));
        let snippet = snippet_around(&content, 60);

        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("needle b"));
        assert_eq!(snippet.chars().count(), 3 + 150 + 3);

        assert_eq!(snippet_around("short text", 0), "short text");
    }

    #[test]
    fn test_snippet_keeps_match_after_length_changing_lowercase() {
        let vault = TempDir::new().unwrap();
        let text = format!("{}{}needle{}", "İ".repeat(120), "x".repeat(10), "y".repeat(300));
        std::fs::write(vault.path().join("turkish.md"), text).unwrap();

        let hits = lexical_search(&walker(vault.path()), "needle", 10);

        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("xxxxxxxxxxneedleyyy"), "{}", hits[0].snippet);
        assert!(hits[0].snippet.starts_with("...İ"));
    }

    #[test]
    fn test_original_char_offset() {
        assert_eq!(original_char_offset("abc", 2), 2);
        // 'İ' lowercases to 'i' + U+0307, three bytes in total
        assert_eq!(original_char_offset("İİab", 6), 2);
        assert_eq!(original_char_offset("ÄBc", 3), 2);
        assert_eq!(original_char_offset("ab", 2), 2);
    }

    #[tokio::test]
    async fn test_semantic_without_index_is_unavailable() {
        let vault = TempDir::new().unwrap();
        let provider: SharedProvider = CountingProvider::new(16);
        let (engine, _tx) = engine(&vault, None, provider);

        let err = engine.search("anything", 5, SearchMode::Semantic).await.unwrap_err();
        assert!(matches!(err, SyncError::IndexUnavailable));
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_lexical() {
        let vault = TempDir::new().unwrap();
        std::fs::write(vault.path().join("a.md"), "the quick brown fox").unwrap();
        let provider: SharedProvider = CountingProvider::new(16);
        let (engine, _tx) = engine(&vault, None, provider);

        let results = engine.search("brown", 5, SearchMode::Auto).await.unwrap();
        assert_eq!(results.mode, SearchMode::Lexical);
        assert!(results.fallback_reason.is_some());
        assert_eq!(results.hits.len(), 1);
        assert!(results.render().contains("**a.md**"));
    }

    #[tokio::test]
    async fn test_semantic_results_are_ordered_by_distance() {
        let vault = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        std::fs::write(vault.path().join("fox.md"), "the quick brown fox jumps").unwrap();
        std::fs::write(vault.path().join("tax.md"), "quarterly tax filing receipts").unwrap();
        std::fs::write(vault.path().join("garden.md"), "tomatoes need sun and water").unwrap();

        let provider = CountingProvider::new(64);
        let cache =
            EmbeddingCache::open(&data.path().join("cache"), provider.clone(), 100, 16).unwrap();
        let builder = IndexBuilder::new(
            Arc::new(cache),
            VectorStore::new(data.path().join("index"), 16),
            Chunker::default(),
            true,
        );
        let (index, _) = builder.build(load_all(&walker(vault.path()))).await.unwrap();

        let (engine, _tx) = engine(&vault, Some(index), provider.clone());
        let results = engine.search("brown fox", 3, SearchMode::Auto).await.unwrap();

        assert_eq!(results.mode, SearchMode::Semantic);
        assert_eq!(results.hits.len(), 3);
        assert_eq!(results.hits[0].path, "fox.md");
        let distances: Vec<f32> = results.hits.iter().filter_map(|h| h.distance).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));

        // Second identical query is served from the query cache
        engine.search("brown fox", 3, SearchMode::Semantic).await.unwrap();
        assert_eq!(engine.query_cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_engine_sees_newly_published_snapshot() {
        let vault = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        std::fs::write(vault.path().join("a.md"), "alpha").unwrap();

        let provider = CountingProvider::new(16);
        let cache =
            EmbeddingCache::open(&data.path().join("cache"), provider.clone(), 100, 16).unwrap();
        let builder = IndexBuilder::new(
            Arc::new(cache),
            VectorStore::new(data.path().join("index"), 16),
            Chunker::default(),
            false,
        );

        let (engine, tx) = engine(&vault, None, provider.clone());
        assert!(engine.semantic("alpha", 1).await.is_err());

        let (index, _) = builder.build(load_all(&walker(vault.path()))).await.unwrap();
        tx.send_replace(Some(index));

        let results = engine.semantic("alpha", 1).await.unwrap();
        assert_eq!(results.hits[0].path, "a.md");
    }
}
