use crate::error::{Result, SyncError};
use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Characters that are illegal in file names on at least one platform
const ILLEGAL: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// A chat exchange to be kept as a note
#[derive(Debug, Clone)]
pub struct Dialogue {
    pub title: String,
    pub user: String,
    pub assistant: String,
    /// Folder under the memo base; `None` uses the default dialogue folder
    pub folder: Option<String>,
}

/// Strip illegal characters and replace spaces with underscores
pub fn sanitize_title(title: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| !ILLEGAL.contains(c))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();

    if safe.trim_matches('_').is_empty() {
        "untitled".to_string()
    } else {
        safe
    }
}

/// Provider tag for the file name, derived from the folder
pub fn provider_tag(folder: Option<&str>) -> &'static str {
    let folder = folder.map(str::to_lowercase).unwrap_or_default();
    if folder.contains("claude") {
        "claude"
    } else if folder.contains("chatgpt") {
        "chatgpt"
    } else {
        "ai"
    }
}

fn assistant_label(tag: &str) -> &'static str {
    match tag {
        "claude" => "Claude",
        "chatgpt" => "ChatGPT",
        _ => "AI",
    }
}

/// `{date}-{provider}-{title}`, without extension
pub fn file_stem(dialogue: &Dialogue, date: NaiveDate) -> String {
    format!(
        "{}-{}-{}",
        date.format("%Y-%m-%d"),
        provider_tag(dialogue.folder.as_deref()),
        sanitize_title(&dialogue.title)
    )
}

pub fn render(dialogue: &Dialogue, date: NaiveDate) -> String {
    let tag = provider_tag(dialogue.folder.as_deref());
    format!(
        "# {title}\n\nDate: {date}\n\n## Conversation\n\n### 👤 User\n\n{user}\n\n### 🤖 {assistant}\n\n{answer}\n",
        title = dialogue.title,
        date = date.format("%Y-%m-%d"),
        user = dialogue.user,
        assistant = assistant_label(tag),
        answer = dialogue.assistant,
    )
}

/// Create `<dir>/<stem>.md`, or `<stem>-1.md`, `<stem>-2.md`, ... if taken.
///
/// The file is created with `create_new`, so an existing note is never opened for
/// writing even when another writer races for the same name.
pub fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            format!("{stem}.md")
        } else {
            format!("{stem}-{counter}.md")
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => counter += 1,
            Err(err) => return Err(SyncError::io(path, err)),
        }
    }
}
