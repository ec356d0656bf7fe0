use crate::config::Config;
use crate::document::load_all;
use crate::embed::SharedProvider;
use crate::error::{Result, SyncError};
use crate::file::{NoteFilter, NoteWalker};
use crate::index::{BuildStats, IndexBuilder};
use crate::vectordb::PublishedIndex;
use crate::watch::{debounce_loop, ChangeWatcher};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

/// Snapshot of the daemon's indexing state
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub indexing: bool,
    pub last_success: Option<DateTime<Local>>,
    pub last_error: Option<String>,
    pub rebuilds: u64,
    pub failures: u64,
    pub last_stats: Option<BuildStats>,
    /// Published generation and its size
    pub generation: Option<String>,
    pub chunks: usize,
    pub documents: usize,
}

/// Owns the watcher and builder lifecycle.
///
/// Holds the single current-index pointer. Readers clone the `Arc` out of it and query
/// that snapshot; a rebuild swaps in a new one only after it is fully built and
/// published. Rebuilds never overlap.
pub struct SyncDaemon {
    walker: NoteWalker,
    builder: IndexBuilder,
    current: watch::Sender<Option<Arc<PublishedIndex>>>,
    status: watch::Sender<SyncStatus>,
    rebuild_lock: Mutex<()>,
    quiet: Duration,
    channel_capacity: usize,
}

impl SyncDaemon {
    pub fn new(
        walker: NoteWalker,
        builder: IndexBuilder,
        quiet: Duration,
        channel_capacity: usize,
    ) -> Self {
        let (current, _) = watch::channel(None);
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            walker,
            builder,
            current,
            status,
            rebuild_lock: Mutex::new(()),
            quiet,
            channel_capacity,
        }
    }

    /// Validate the vault root, open cache and index storage, and reload the last
    /// published index if it was built with the same provider.
    pub fn open(config: &Config, provider: SharedProvider) -> Result<Self> {
        let root = config.vault_root()?;
        let filter = NoteFilter::new(&root, &config.vault.extensions).exclude(&config.data_dir);
        config.data_dir()?;

        let builder = IndexBuilder::from_config(config, provider)?;
        let daemon = Self::new(
            NoteWalker::new(filter),
            builder,
            config.quiet_interval(),
            config.watch.channel_capacity,
        );

        match daemon.builder.store().load() {
            Ok(Some(index)) if index.manifest().provider == daemon.provider().id() => {
                daemon.install(Arc::new(index));
            }
            Ok(Some(index)) => warn!(
                "Published index was built with {}, not {}; it will be replaced on the next rebuild",
                index.manifest().provider,
                daemon.provider().id()
            ),
            Ok(None) => info!("No published index yet"),
            Err(err) => warn!("Could not load published index: {}", err),
        }

        Ok(daemon)
    }

    pub fn walker(&self) -> &NoteWalker {
        &self.walker
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    pub fn provider(&self) -> &SharedProvider {
        self.builder.provider()
    }

    /// The currently published index, if any
    pub fn snapshot(&self) -> Option<Arc<PublishedIndex>> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PublishedIndex>>> {
        self.current.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn install(&self, index: Arc<PublishedIndex>) {
        let generation = index.generation().to_string();
        let chunks = index.len();
        let documents = index.manifest().document_count;

        self.current.send_replace(Some(index));
        self.status.send_modify(|s| {
            s.generation = Some(generation);
            s.chunks = chunks;
            s.documents = documents;
        });
    }

    /// Reload every note and rebuild the index. Waits for any rebuild in progress.
    ///
    /// On failure the previously published index keeps serving.
    pub async fn rebuild(&self, reason: &str) -> Result<BuildStats> {
        let _guard = self.rebuild_lock.lock().await;

        info!("Rebuilding index ({})", reason);
        self.status.send_modify(|s| s.indexing = true);

        let walker = self.walker.clone();
        let result = match tokio::task::spawn_blocking(move || load_all(&walker)).await {
            Ok(documents) => self.builder.build(documents).await,
            Err(err) => Err(SyncError::Build(format!("note loading task failed: {err}"))),
        };

        match result {
            Ok((index, stats)) => {
                self.install(index);
                self.status.send_modify(|s| {
                    s.indexing = false;
                    s.rebuilds += 1;
                    s.last_success = Some(Local::now());
                    s.last_error = None;
                    s.last_stats = Some(stats.clone());
                });
                Ok(stats)
            }
            Err(err) => {
                error!("Rebuild ({}) failed: {}", reason, err);
                let message = err.to_string();
                self.status.send_modify(|s| {
                    s.indexing = false;
                    s.failures += 1;
                    s.last_error = Some(message);
                });
                Err(err)
            }
        }
    }

    /// Watch the vault until `shutdown` turns true.
    ///
    /// Starts the OS watcher, performs an initial full build (a failure is logged and
    /// watching continues), then rebuilds after every quiet period.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (_watcher, events) =
            ChangeWatcher::start(self.walker.filter().clone(), self.channel_capacity)?;

        if let Err(err) = self.rebuild("initial scan").await {
            warn!("Initial scan failed, continuing to watch: {}", err);
        }

        let daemon = Arc::clone(&self);
        debounce_loop(events, self.quiet, shutdown, move |changes| {
            let daemon = Arc::clone(&daemon);
            async move {
                // Failures are recorded in the status and retried on the next change
                let _ = daemon.rebuild(&format!("{changes} changes")).await;
            }
        })
        .await;

        info!("Sync daemon stopped");
        Ok(())
    }
}
