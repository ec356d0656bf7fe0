mod memo;

pub use memo::{
    create_unique, file_stem, provider_tag, render as render_dialogue, sanitize_title, Dialogue,
};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::file::{relative_path, NoteFilter, NoteWalker};
use chrono::{DateTime, Local, NaiveDate};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// A note and when it last changed
#[derive(Debug, Clone)]
pub struct RecentNote {
    pub relative: String,
    pub modified: DateTime<Local>,
}

impl std::fmt::Display for RecentNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "- [{}] **{}**", self.modified.format("%Y-%m-%d %H:%M"), self.relative)
    }
}

/// Read and write access to notes under the vault root
#[derive(Debug, Clone)]
pub struct Vault {
    walker: NoteWalker,
    memo_base: String,
    default_dialogue_folder: String,
}

impl Vault {
    pub fn new(
        walker: NoteWalker,
        memo_base: impl Into<String>,
        default_dialogue_folder: impl Into<String>,
    ) -> Self {
        Self {
            walker,
            memo_base: memo_base.into(),
            default_dialogue_folder: default_dialogue_folder.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let root = config.vault_root()?;
        let filter = NoteFilter::new(&root, &config.vault.extensions).exclude(&config.data_dir);

        Ok(Self::new(
            NoteWalker::new(filter),
            &config.vault.memo_base,
            &config.vault.default_dialogue_folder,
        ))
    }

    pub fn root(&self) -> &Path {
        self.walker.root()
    }

    pub fn walker(&self) -> &NoteWalker {
        &self.walker
    }

    /// Join a caller-supplied relative path onto the root, refusing anything that
    /// could land outside it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative.trim());
        if candidate.as_os_str().is_empty() {
            return Err(SyncError::InvalidPath(relative.to_string()));
        }

        let mut resolved = self.root().to_path_buf();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SyncError::InvalidPath(relative.to_string()));
                }
            }
        }

        if resolved == self.root() {
            return Err(SyncError::InvalidPath(relative.to_string()));
        }
        Ok(resolved)
    }

    pub fn read_note(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        if path.exists() && !path.is_file() {
            return Err(SyncError::InvalidPath(relative.to_string()));
        }
        std::fs::read_to_string(&path).map_err(|e| SyncError::io(path, e))
    }

    /// Write `content` to a note, creating parent folders. A path without a tracked
    /// extension gets `.md` appended. Returns the vault-relative path written.
    pub fn write_note(&self, relative: &str, content: &str) -> Result<String> {
        let mut path = self.resolve(relative)?;
        if !self.walker.filter().has_tracked_extension(&path) {
            let mut name = path.as_os_str().to_owned();
            name.push(".md");
            path = PathBuf::from(name);
        }
        if path.is_dir() {
            return Err(SyncError::InvalidPath(relative.to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        std::fs::write(&path, content).map_err(|e| SyncError::io(&path, e))?;

        let written = relative_path(self.root(), &path);
        info!("Wrote note {}", written);
        Ok(written)
    }

    /// Save a dialogue under `<memo base>/<folder>/` with a name that never replaces
    /// an existing note.
    pub fn write_dialogue(&self, dialogue: &Dialogue, date: NaiveDate) -> Result<String> {
        let folder = dialogue
            .folder
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.default_dialogue_folder);

        let dir = self.resolve(&format!("{}/{}", self.memo_base, folder))?;
        let (path, mut file) = create_unique(&dir, &file_stem(dialogue, date))?;

        file.write_all(render_dialogue(dialogue, date).as_bytes())
            .map_err(|e| SyncError::io(&path, e))?;

        let written = relative_path(self.root(), &path);
        info!("Saved dialogue {}", written);
        Ok(written)
    }

    /// Most recently modified notes first
    pub fn list_recent(&self, limit: usize) -> Vec<RecentNote> {
        let mut notes = self.walker.notes();
        notes.sort_by(|a, b| b.modified.cmp(&a.modified));

        notes
            .into_iter()
            .take(limit)
            .map(|note| RecentNote {
                relative: note.relative,
                modified: DateTime::<Local>::from(note.modified),
            })
            .collect()
    }
}
