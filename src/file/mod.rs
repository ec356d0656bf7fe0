use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Information about a discovered note
#[derive(Debug, Clone)]
pub struct NoteFile {
    pub path: PathBuf,
    /// Path relative to the vault root, `/`-separated
    pub relative: String,
    pub modified: SystemTime,
    pub size: u64,
}

/// Statistics about walked files
#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub total_entries: usize,
    pub tracked_files: usize,
    pub skipped_untracked: usize,
    pub errors: usize,
}

/// Decides which paths under the vault root are tracked notes
#[derive(Debug, Clone)]
pub struct NoteFilter {
    root: PathBuf,
    extensions: Vec<String>,
    excluded: Vec<PathBuf>,
}

impl NoteFilter {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            excluded: Vec::new(),
        }
    }

    /// Never track anything under `dir` (e.g. a data directory placed inside the vault)
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_tracked_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|t| t.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Whether `path` is a tracked note location. Only inspects the path,
    /// so it also answers for files that were just deleted.
    pub fn is_tracked(&self, path: &Path) -> bool {
        if !self.has_tracked_extension(path) {
            return false;
        }
        if self.excluded.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        // Hidden folders such as .obsidian and .trash are app state, not notes
        !relative.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }

    pub fn relative(&self, path: &Path) -> String {
        relative_path(&self.root, path)
    }
}

/// `/`-separated path of `path` relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks the vault and yields tracked notes in a stable (file name sorted) order
#[derive(Debug, Clone)]
pub struct NoteWalker {
    filter: NoteFilter,
}

impl NoteWalker {
    pub fn new(filter: NoteFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &NoteFilter {
        &self.filter
    }

    pub fn root(&self) -> &Path {
        self.filter.root()
    }

    /// Walk the vault, returning tracked notes. Unreadable entries are logged and skipped.
    pub fn walk(&self) -> (Vec<NoteFile>, WalkStats) {
        let mut files = Vec::new();
        let mut stats = WalkStats::default();

        debug!("Starting note walk in: {}", self.root().display());

        let mut builder = WalkBuilder::new(self.root());
        builder
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .add_custom_ignore_filename(".vaultsyncignore")
            .sort_by_file_name(|a, b| a.cmp(b));

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error walking vault: {}", err);
                    stats.errors += 1;
                    continue;
                }
            };
            stats.total_entries += 1;

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if !self.filter.is_tracked(path) {
                stats.skipped_untracked += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warn!("Cannot stat {}: {}", path.display(), err);
                    stats.errors += 1;
                    continue;
                }
            };

            files.push(NoteFile {
                path: path.to_path_buf(),
                relative: self.filter.relative(path),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
            });
            stats.tracked_files += 1;
        }

        debug!(
            "Note walk complete: {} tracked, {} skipped, {} errors",
            stats.tracked_files, stats.skipped_untracked, stats.errors
        );

        (files, stats)
    }

    /// Walk files, returning just the notes (simpler API)
    pub fn notes(&self) -> Vec<NoteFile> {
        self.walk().0
    }
}
