//! File-system change detection and debouncing.
//!
//! The OS watcher callback filters raw notify events down to tracked notes and pushes
//! them into a bounded channel. A single debounce task owns [`DebounceState`] and fires
//! one rebuild once the vault has been quiet for the configured interval.

use crate::error::{Result, SyncError};
use crate::file::NoteFilter;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A qualifying change to a tracked note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Map a notify event kind to a note change. Directory, access and metadata-only
/// events do not qualify.
pub fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(CreateKind::Folder) => None,
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(RemoveKind::Folder) => None,
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Qualifying changes contained in one notify event
pub fn qualifying_changes(filter: &NoteFilter, event: &Event) -> Vec<ChangeEvent> {
    let Some(kind) = classify(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter(|path| filter.is_tracked(path) && !path.is_dir())
        .map(|path| ChangeEvent {
            path: path.clone(),
            kind,
        })
        .collect()
}

/// Recursive OS watch over the vault root. Watching stops when this is dropped.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    /// Start watching `filter.root()`, delivering qualifying changes into a bounded channel
    pub fn start(
        filter: NoteFilter,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let root = filter.root().to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in qualifying_changes(&filter, &event) {
                        if sender.blocking_send(change).is_err() {
                            // Debounce task is gone
                            return;
                        }
                    }
                }
                Err(err) => warn!("Watcher error: {}", err),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| SyncError::Config(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Config(format!("failed to watch {}: {e}", root.display())))?;

        info!("Watching {} for changes", root.display());
        Ok((Self { _watcher: watcher }, receiver))
    }
}

/// IDLE (no `last_event`) or PENDING (waiting for `quiet` to elapse after `last_event`)
#[derive(Debug, Clone)]
pub struct DebounceState {
    quiet: Duration,
    last_event: Option<Instant>,
    pending: usize,
}

impl DebounceState {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_event: None,
            pending: 0,
        }
    }

    /// IDLE -> PENDING, or refresh the timestamp while PENDING
    pub fn record(&mut self, at: Instant) {
        self.last_event = Some(at);
        self.pending += 1;
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// When the pending burst becomes quiet
    pub fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|at| at + self.quiet)
    }

    /// PENDING -> IDLE, returning how many events were coalesced
    pub fn fire(&mut self) -> usize {
        self.last_event = None;
        std::mem::take(&mut self.pending)
    }
}

/// Coalesce change events into calls of `on_quiet(coalesced_count)`.
///
/// `on_quiet` is awaited inline, so at most one runs at a time; events that arrive
/// meanwhile are queued and start a new quiet period once it returns. When `shutdown`
/// turns true (or its sender is dropped) no more events are taken, a pending quiet
/// period is still waited out and handled, and the loop returns.
pub async fn debounce_loop<F, Fut>(
    mut events: mpsc::Receiver<ChangeEvent>,
    quiet: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut on_quiet: F,
) where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut state = DebounceState::new(quiet);
    let mut stopping = *shutdown.borrow();

    loop {
        if stopping && !state.is_pending() {
            break;
        }

        let deadline = state.deadline();

        tokio::select! {
            received = events.recv(), if !stopping => match received {
                Some(change) => {
                    trace!("{:?} {}", change.kind, change.path.display());
                    state.record(Instant::now());
                }
                None => {
                    debug!("Change channel closed");
                    stopping = true;
                }
            },
            changed = shutdown.changed(), if !stopping => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Stop requested; {} events pending", state.pending());
                    stopping = true;
                }
            },
            () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let coalesced = state.fire();
                debug!("Vault quiet; rebuilding after {} change events", coalesced);
                on_quiet(coalesced).await;
            }
        }
    }
}
