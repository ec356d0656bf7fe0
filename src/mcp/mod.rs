//! MCP server exposing vault search and note tools over stdio.
//!
//! Every tool answers with text. Failures come back as error results carrying a
//! readable message, never as protocol errors.

use std::sync::Arc;

use chrono::Local;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::embed::SharedProvider;
use crate::search::{SearchEngine, SearchMode};
use crate::server::{SyncDaemon, SyncStatus};
use crate::vault::{Dialogue, Vault};

const DEFAULT_LIMIT: usize = 10;

const INSTRUCTIONS: &str = "Tools for an Obsidian-style Markdown vault. \
Use `search` to find notes (semantic when an index is available, otherwise substring), \
`read_note` to open one by its vault-relative path, `list_recent` to see what changed lately, \
`save_dialogue` to keep an insight from this conversation as a new note, and `write_note` \
to create or replace a note at a given path. `index_status` reports indexing health.";

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    #[schemars(description = "Search query")]
    pub query: String,

    #[schemars(description = "Maximum number of results (default: 10)")]
    pub limit: Option<usize>,

    #[schemars(description = "lexical, semantic or auto (default: auto)")]
    pub mode: Option<SearchMode>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadNoteRequest {
    #[schemars(description = "Path relative to the vault root, e.g. '000_Slipbox/memo.md'")]
    pub relative_path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WriteNoteRequest {
    #[schemars(description = "Path relative to the vault root; '.md' is added when missing")]
    pub relative_path: String,

    #[schemars(description = "Full Markdown content of the note")]
    pub content: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SaveDialogueRequest {
    #[schemars(description = "Note title, also used in the file name")]
    pub title: String,

    #[schemars(description = "What the user said")]
    pub user_content: String,

    #[schemars(description = "The assistant's answer or analysis")]
    pub ai_content: String,

    #[schemars(
        description = "Folder under the memo base, e.g. '11_claude_dialogues' (default: ai_dialogues)"
    )]
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListRecentRequest {
    #[schemars(description = "Number of notes to list (default: 10)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IndexStatusRequest {}

/// Tool server backed by a running [`SyncDaemon`]
#[derive(Clone)]
pub struct VaultServer {
    daemon: Arc<SyncDaemon>,
    engine: Arc<SearchEngine>,
    vault: Vault,
    tool_router: ToolRouter<VaultServer>,
}

fn text(message: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(message.into())]))
}

fn failure(message: impl std::fmt::Display) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(format!("Error: {message}"))]))
}

#[tool_router]
impl VaultServer {
    pub fn new(daemon: Arc<SyncDaemon>, vault: Vault, query_cache_entries: u64) -> Self {
        let engine = SearchEngine::new(
            daemon.walker().clone(),
            daemon.provider().clone(),
            daemon.subscribe(),
            query_cache_entries,
        );
        Self {
            daemon,
            engine: Arc::new(engine),
            vault,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Search vault notes. Semantic search ranks note chunks by meaning \
        when an index is published; otherwise falls back to case-insensitive substring search \
        over file contents and names.")]
    async fn search(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let limit = req.limit.unwrap_or(DEFAULT_LIMIT);
        let mode = req.mode.unwrap_or_default();

        match self.engine.search(&req.query, limit, mode).await {
            Ok(results) => text(results.render()),
            Err(err) => failure(err),
        }
    }

    #[tool(description = "Read a note by its path relative to the vault root.")]
    async fn read_note(
        &self,
        Parameters(req): Parameters<ReadNoteRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.vault.read_note(&req.relative_path) {
            Ok(content) => text(content),
            Err(err) => failure(err),
        }
    }

    #[tool(description = "Create or replace a note at a path relative to the vault root.")]
    async fn write_note(
        &self,
        Parameters(req): Parameters<WriteNoteRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.vault.write_note(&req.relative_path, &req.content) {
            Ok(path) => text(format!("Wrote note: {path}")),
            Err(err) => failure(err),
        }
    }

    #[tool(description = "Save an insight or discussion from this chat as a new note \
        named 'YYYY-MM-DD-<provider>-<title>.md'. Never overwrites an existing note.")]
    async fn save_dialogue(
        &self,
        Parameters(req): Parameters<SaveDialogueRequest>,
    ) -> Result<CallToolResult, McpError> {
        let dialogue = Dialogue {
            title: req.title,
            user: req.user_content,
            assistant: req.ai_content,
            folder: req.folder,
        };

        match self.vault.write_dialogue(&dialogue, Local::now().date_naive()) {
            Ok(path) => text(format!("Saved note: {path}")),
            Err(err) => failure(err),
        }
    }

    #[tool(description = "List the most recently modified notes.")]
    async fn list_recent(
        &self,
        Parameters(req): Parameters<ListRecentRequest>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.vault.clone();
        let limit = req.limit.unwrap_or(DEFAULT_LIMIT);

        let recent = match tokio::task::spawn_blocking(move || vault.list_recent(limit)).await {
            Ok(recent) => recent,
            Err(err) => return failure(err),
        };
        if recent.is_empty() {
            return text("No notes found.");
        }

        let lines: Vec<String> = recent.iter().map(ToString::to_string).collect();
        text(format!("Recently modified notes:\n{}", lines.join("\n")))
    }

    #[tool(description = "Report indexing health: published generation, chunk counts, \
        last rebuild and last error.")]
    async fn index_status(
        &self,
        Parameters(_req): Parameters<IndexStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        text(render_status(&self.daemon.status(), self.daemon.provider().id()))
    }
}

#[tool_handler]
impl ServerHandler for VaultServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "vaultsync".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Vault Sync".to_string()),
                website_url: None,
                icons: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}

/// Human-readable status report shared by the tool and the CLI
pub fn render_status(status: &SyncStatus, provider: &str) -> String {
    let mut lines = vec![format!("Provider: {provider}")];

    match &status.generation {
        Some(generation) => lines.push(format!(
            "Published index: {generation} ({} notes, {} chunks)",
            status.documents, status.chunks
        )),
        None => lines.push("Published index: none".to_string()),
    }

    lines.push(format!("Indexing now: {}", if status.indexing { "yes" } else { "no" }));
    lines.push(format!("Rebuilds: {} ok, {} failed", status.rebuilds, status.failures));

    if let Some(at) = status.last_success {
        lines.push(format!("Last success: {}", at.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(stats) = &status.last_stats {
        lines.push(format!(
            "Last build: {} embedded, {} from cache in {:?}",
            stats.embedded,
            stats.cache_hits,
            stats.total()
        ));
    }
    if let Some(err) = &status.last_error {
        lines.push(format!("Last error: {err}"));
    }

    lines.join("\n")
}

/// Run the sync daemon in the background and serve tools on stdio until the client
/// disconnects.
pub async fn serve_stdio(config: &Config, provider: SharedProvider) -> anyhow::Result<()> {
    let vault = Vault::from_config(config)?;
    let daemon = Arc::new(SyncDaemon::open(config, provider)?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let sync = tokio::spawn(Arc::clone(&daemon).run(stop_rx));

    let server = VaultServer::new(daemon, vault, config.embedding.query_cache_entries);
    let service = server.serve(stdio()).await?;

    info!("MCP server ready on stdio");
    service.waiting().await?;
    info!("MCP client disconnected, stopping sync");

    let _ = stop_tx.send(true);
    match sync.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("Sync daemon exited with error: {}", err),
        Err(err) => warn!("Sync daemon task failed: {}", err),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::embed::testing::CountingProvider;
    use crate::embed::EmbeddingCache;
    use crate::file::{NoteFilter, NoteWalker};
    use crate::index::IndexBuilder;
    use crate::vectordb::VectorStore;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        vault: TempDir,
        _data: TempDir,
        server: VaultServer,
        daemon: Arc<SyncDaemon>,
    }

    fn fixture() -> Fixture {
        let vault = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let provider = CountingProvider::new(32);

        let cache = EmbeddingCache::open(&data.path().join("cache"), provider, 100, 16).unwrap();
        let builder = IndexBuilder::new(
            Arc::new(cache),
            VectorStore::new(data.path().join("index"), 16),
            Chunker::default(),
            true,
        );
        let walker = NoteWalker::new(NoteFilter::new(vault.path(), &["md".to_string()]));
        let daemon = Arc::new(SyncDaemon::new(
            walker.clone(),
            builder,
            Duration::from_millis(50),
            16,
        ));
        let server = VaultServer::new(
            Arc::clone(&daemon),
            Vault::new(walker, "000_Slipbox", "ai_dialogues"),
            16,
        );

        Fixture {
            vault,
            _data: data,
            server,
            daemon,
        }
    }

    fn body(result: &CallToolResult) -> &str {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.as_str())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_search_tool_degrades_to_lexical() {
        let f = fixture();
        std::fs::create_dir(f.vault.path().join("notes")).unwrap();
        std::fs::write(f.vault.path().join("notes/a.md"), "the quick brown fox").unwrap();

        let result = f
            .server
            .search(Parameters(SearchRequest {
                query: "brown".to_string(),
                limit: Some(10),
                mode: None,
            }))
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        assert!(body(&result).contains("**notes/a.md**"));
        assert!(body(&result).contains("brown"));
    }

    #[tokio::test]
    async fn test_semantic_search_tool_after_rebuild() {
        let f = fixture();
        std::fs::write(f.vault.path().join("fox.md"), "the quick brown fox").unwrap();
        std::fs::write(f.vault.path().join("tax.md"), "tax receipts").unwrap();

        let req = || SearchRequest {
            query: "brown fox".to_string(),
            limit: Some(1),
            mode: Some(SearchMode::Semantic),
        };

        let before = f.server.search(Parameters(req())).await.unwrap();
        assert_eq!(before.is_error, Some(true));

        f.daemon.rebuild("test").await.unwrap();
        let after = f.server.search(Parameters(req())).await.unwrap();
        assert_ne!(after.is_error, Some(true));
        assert!(body(&after).contains("**fox.md** (chunk 0"));
    }

    #[tokio::test]
    async fn test_note_tools_report_errors_as_text() {
        let f = fixture();

        let escaped = f
            .server
            .read_note(Parameters(ReadNoteRequest {
                relative_path: "../secret.md".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(escaped.is_error, Some(true));
        assert!(body(&escaped).starts_with("Error: invalid note path"));

        let written = f
            .server
            .write_note(Parameters(WriteNoteRequest {
                relative_path: "ideas/new".to_string(),
                content: "hello".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(body(&written), "Wrote note: ideas/new.md");

        let read = f
            .server
            .read_note(Parameters(ReadNoteRequest {
                relative_path: "ideas/new.md".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(body(&read), "hello");
    }

    #[tokio::test]
    async fn test_save_dialogue_and_list_recent() {
        let f = fixture();
        let save = || SaveDialogueRequest {
            title: "Draft".to_string(),
            user_content: "q".to_string(),
            ai_content: "a".to_string(),
            folder: Some("11_claude_dialogues".to_string()),
        };

        let first = f.server.save_dialogue(Parameters(save())).await.unwrap();
        let second = f.server.save_dialogue(Parameters(save())).await.unwrap();
        assert!(body(&first).ends_with("-claude-Draft.md"));
        assert!(body(&second).ends_with("-claude-Draft-1.md"));

        let recent = f
            .server
            .list_recent(Parameters(ListRecentRequest { limit: Some(5) }))
            .await
            .unwrap();
        assert!(body(&recent).starts_with("Recently modified notes:"));
        assert_eq!(body(&recent).lines().count(), 3);
    }

    #[tokio::test]
    async fn test_index_status_tool() {
        let f = fixture();
        std::fs::write(f.vault.path().join("a.md"), "alpha").unwrap();
        f.daemon.rebuild("test").await.unwrap();

        let result = f.server.index_status(Parameters(IndexStatusRequest {})).await.unwrap();
        let report = body(&result);
        assert!(report.contains("Provider: hash/32"));
        assert!(report.contains("(1 notes, 1 chunks)"));
        assert!(report.contains("Rebuilds: 1 ok, 0 failed"));
    }
}
