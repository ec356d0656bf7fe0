mod links;

pub use links::extract_links;

use crate::error::{Result, SyncError};
use crate::file::{NoteFile, NoteWalker};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, warn};

/// A note loaded from disk. Replaced wholesale on every reload.
#[derive(Debug, Clone)]
pub struct Document {
    /// Absolute path; the document's identity
    pub path: PathBuf,

    /// Path relative to the vault root, used in provenance and output
    pub relative: String,

    pub text: String,

    pub modified: SystemTime,

    /// Wiki link targets found in `text` (empty when link extraction is off)
    pub links: BTreeSet<String>,
}

impl Document {
    pub fn new(path: PathBuf, relative: String, text: String, modified: SystemTime) -> Self {
        Self {
            path,
            relative,
            text,
            modified,
            links: BTreeSet::new(),
        }
    }

    pub fn load(file: &NoteFile) -> Result<Self> {
        let text = std::fs::read_to_string(&file.path).map_err(|e| SyncError::io(&file.path, e))?;
        Ok(Self::new(
            file.path.clone(),
            file.relative.clone(),
            text,
            file.modified,
        ))
    }

    /// Populate `links` from the text
    pub fn with_links(mut self) -> Self {
        self.links = extract_links(&self.text);
        self
    }
}

/// Load every tracked note. Unreadable files are logged and skipped.
pub fn load_all(walker: &NoteWalker) -> Vec<Document> {
    let files = walker.notes();
    let mut documents = Vec::with_capacity(files.len());

    for file in &files {
        match Document::load(file) {
            Ok(doc) => documents.push(doc),
            Err(err) => warn!("Skipping note: {}", err),
        }
    }

    debug!("Loaded {}/{} notes", documents.len(), files.len());
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::NoteFilter;
    use tempfile::TempDir;

    #[test]
    fn test_load_all_with_links() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "links to [[b]] and [[c|C]]").unwrap();
        std::fs::write(dir.path().join("b.md"), "no links").unwrap();

        let walker = NoteWalker::new(NoteFilter::new(dir.path(), &["md".to_string()]));
        let docs: Vec<_> = load_all(&walker).into_iter().map(Document::with_links).collect();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].relative, "a.md");
        assert_eq!(docs[0].path, dir.path().join("a.md"));
        assert!(docs[0].links.contains("b"));
        assert!(docs[0].links.contains("c"));
        assert!(docs[1].links.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_utf8_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.md"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("good.md"), "ok").unwrap();

        let walker = NoteWalker::new(NoteFilter::new(dir.path(), &["md".to_string()]));
        let docs = load_all(&walker);

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative, "good.md");
    }
}
