use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{Config, ProviderKind};
use crate::embed::create_provider;
use crate::mcp::serve_stdio;
use crate::search::{lexical_search, SearchEngine, SearchMode, SearchResults};
use crate::server::SyncDaemon;
use crate::vectordb::IndexManifest;
use crate::vault::{Dialogue, Vault};
use tracing::warn;

/// Keep a semantic search index in sync with a Markdown vault
#[derive(Parser, Debug)]
#[command(name = "vaultsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Vault root (overrides OBSIDIAN_VAULT_PATH and the config file)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Embedding provider: openai, local or hash
    #[arg(long, global = true)]
    pub provider: Option<ProviderKind>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and publish the index once
    Index,

    /// Search notes
    Search {
        /// Search query
        query: String,

        /// Maximum results to return
        #[arg(short = 'm', long, default_value = "10")]
        limit: usize,

        /// Search mode
        #[arg(long, value_enum, default_value_t = SearchMode::Auto)]
        mode: SearchMode,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch the vault and rebuild after changes until interrupted
    Watch,

    /// Serve vault tools over MCP (stdio) while keeping the index in sync
    Mcp,

    /// Print a note
    Read {
        /// Path relative to the vault root
        path: String,
    },

    /// Create or replace a note (content from --content or stdin)
    Write {
        /// Path relative to the vault root
        path: String,

        #[arg(long)]
        content: Option<String>,
    },

    /// Save a dialogue as a new note
    Save {
        /// Note title
        title: String,

        /// What the user said
        #[arg(long)]
        user: String,

        /// The assistant's answer
        #[arg(long)]
        ai: String,

        /// Folder under the memo base (default: ai_dialogues)
        #[arg(long)]
        folder: Option<String>,
    },

    /// List recently modified notes
    Recent {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Show the published index and cache state
    Status,
}

impl Cli {
    /// Configuration with command-line overrides applied
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load()?;
        if let Some(vault) = &self.vault {
            config.vault.root = vault.clone();
        }
        if let Some(provider) = self.provider {
            config.embedding.provider = provider;
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Index => index(&config, quiet).await,
        Commands::Search {
            query,
            limit,
            mode,
            json,
        } => search(&config, &query, limit, mode, json).await,
        Commands::Watch => watch_vault(&config).await,
        Commands::Mcp => {
            let provider = create_provider(&config.embedding)?;
            serve_stdio(&config, provider).await
        }
        Commands::Read { path } => {
            let vault = Vault::from_config(&config)?;
            print!("{}", vault.read_note(&path)?);
            Ok(())
        }
        Commands::Write { path, content } => {
            let content = match content {
                Some(content) => content,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read note content from stdin")?;
                    buf
                }
            };
            let written = Vault::from_config(&config)?.write_note(&path, &content)?;
            println!("{} {}", "Wrote".green(), written);
            Ok(())
        }
        Commands::Save {
            title,
            user,
            ai,
            folder,
        } => {
            let dialogue = Dialogue {
                title,
                user,
                assistant: ai,
                folder,
            };
            let written =
                Vault::from_config(&config)?.write_dialogue(&dialogue, Local::now().date_naive())?;
            println!("{} {}", "Saved".green(), written);
            Ok(())
        }
        Commands::Recent { limit } => {
            let recent = Vault::from_config(&config)?.list_recent(limit);
            if recent.is_empty() {
                println!("{}", "No notes found.".dimmed());
            }
            for note in recent {
                println!("{note}");
            }
            Ok(())
        }
        Commands::Status => status(&config).await,
    }
}

fn open_daemon(config: &Config) -> Result<SyncDaemon> {
    let provider = create_provider(&config.embedding)?;
    Ok(SyncDaemon::open(config, provider)?)
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

async fn index(config: &Config, quiet: bool) -> Result<()> {
    let daemon = open_daemon(config)?;

    if !quiet {
        println!("{}", "Vault Indexer".bright_cyan().bold());
        println!("{}", "=".repeat(60));
        println!("Vault:    {}", daemon.walker().root().display());
        println!("Data:     {}", config.data_dir.display());
        println!(
            "Provider: {} ({} dims)",
            daemon.provider().id(),
            daemon.provider().dimensions()
        );

        println!("\n{}", "Phase 1: Note Discovery".bright_cyan());
        println!("{}", "-".repeat(60));
        let (notes, stats) = daemon.walker().walk();
        println!("Found {} notes", notes.len());
        println!("   Entries scanned: {}", stats.total_entries);
        println!("   Untracked: {}", stats.skipped_untracked);
        if stats.errors > 0 {
            println!("   {}", format!("Errors: {}", stats.errors).yellow());
        }

        println!("\n{}", "Phase 2: Chunk, Embed, Publish".bright_cyan());
        println!("{}", "-".repeat(60));
    }

    let pb = (!quiet).then(|| spinner("Rebuilding index..."));
    let result = daemon.rebuild("cli").await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let stats = result?;

    if !quiet {
        println!("Chunked in   {:?}", stats.chunking);
        println!("Embedded in  {:?}", stats.embedding);
        println!("Published in {:?}", stats.storage);

        let cache = daemon.builder().cache().stats();
        println!("\n{}", "Final Statistics".bright_green().bold());
        println!("{}", "=".repeat(60));
        println!("   Generation:   {}", stats.generation);
        println!("   Notes:        {}", stats.documents);
        println!("   Chunks:       {}", stats.chunks);
        println!("   Blank chunks: {}", stats.skipped_blank);
        println!("   Embedded:     {}", stats.embedded);
        println!("   From cache:   {}", stats.cache_hits);
        println!("   Cache hit rate: {:.1}%", cache.hit_rate() * 100.0);
        println!("   Total time:   {:?}", stats.total());
    }

    Ok(())
}

async fn search(
    config: &Config,
    query: &str,
    limit: usize,
    mode: SearchMode,
    json: bool,
) -> Result<()> {
    let lexical_only = |reason: Option<String>| -> Result<SearchResults> {
        let vault = Vault::from_config(config)?;
        Ok(SearchResults {
            query: query.to_string(),
            mode: SearchMode::Lexical,
            hits: lexical_search(vault.walker(), query, limit),
            fallback_reason: reason,
        })
    };

    let results = if mode == SearchMode::Lexical {
        lexical_only(None)?
    } else {
        match open_daemon(config) {
            Ok(daemon) => {
                let engine = SearchEngine::new(
                    daemon.walker().clone(),
                    daemon.provider().clone(),
                    daemon.subscribe(),
                    config.embedding.query_cache_entries,
                );
                engine.search(query, limit, mode).await?
            }
            // No usable provider (e.g. missing API key): substring search still works
            Err(err) if mode == SearchMode::Auto => {
                warn!("Semantic search unavailable: {:#}", err);
                lexical_only(Some(format!("{err:#}")))?
            }
            Err(err) => return Err(err),
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    print_results(&results);
    Ok(())
}

fn print_results(results: &SearchResults) {
    println!("{}", "Search Results".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Query: \"{}\" ({})", results.query.bright_yellow(), results.mode);
    if let Some(reason) = &results.fallback_reason {
        println!("{}", format!("Semantic search unavailable: {reason}").yellow());
    }
    println!("Found {} results\n", results.hits.len());

    if results.hits.is_empty() {
        println!("{}", "No matches found.".dimmed());
        return;
    }

    for (rank, hit) in results.hits.iter().enumerate() {
        match hit.distance {
            Some(distance) => println!(
                "{}. {} {}",
                rank + 1,
                hit.path.bright_green(),
                format!("(chunk {}, distance {:.4})", hit.chunk.unwrap_or(0), distance).dimmed()
            ),
            None => println!("{}. {}", rank + 1, hit.path.bright_green()),
        }
        if !hit.snippet.is_empty() {
            println!("   {}", hit.snippet);
        }
        if !hit.links.is_empty() {
            println!("   {} {}", "links:".dimmed(), hit.links.join(", "));
        }
    }
}

async fn watch_vault(config: &Config) -> Result<()> {
    let daemon = Arc::new(open_daemon(config)?);

    println!("{}", "Watching vault".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Vault: {}", daemon.walker().root().display());
    println!("Quiet interval: {:?}", config.quiet_interval());
    println!("Press Ctrl+C to stop\n");

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&daemon).run(stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    println!("\n{}", "Stopping...".yellow());
    let _ = stop_tx.send(true);

    handle.await.context("sync task panicked")??;

    let status = daemon.status();
    println!(
        "{} {} rebuilds, {} failures",
        "Stopped.".green(),
        status.rebuilds,
        status.failures
    );
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let daemon = open_daemon(config)?;
    let cache = daemon.builder().cache();

    println!("{}", "Vault Sync Status".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Vault: {}", daemon.walker().root().display());
    let published = daemon.snapshot();
    println!(
        "{}",
        render_published(published.as_ref().map(|i| i.manifest()), daemon.provider().id())
    );
    println!("Cached embeddings: {}", cache.len()?);
    println!("Cache path: {}", cache.path().display());
    Ok(())
}

/// On-disk index state; rebuild counters only exist inside a running daemon
fn render_published(manifest: Option<&IndexManifest>, provider: &str) -> String {
    let mut lines = vec![format!("Provider: {provider}")];

    let Some(manifest) = manifest else {
        lines.push("Published index: none (run `vaultsync index`)".to_string());
        return lines.join("\n");
    };

    lines.push(format!(
        "Published index: {} ({} notes, {} chunks)",
        manifest.generation, manifest.document_count, manifest.chunk_count
    ));
    lines.push(format!(
        "Built: {}",
        manifest.built_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    ));
    if manifest.provider != provider {
        lines.push(format!(
            "Built with {} ({} dims); the next rebuild replaces it",
            manifest.provider, manifest.dimensions
        ));
    }

    lines.join("\n")
}
