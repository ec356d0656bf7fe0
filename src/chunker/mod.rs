use crate::config::ChunkingConfig;
use crate::document::Document;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

mod splitter;

pub use splitter::{Span, Spans};

/// Split separators, highest priority first: paragraph, line, sentence end,
/// clause punctuation, word, and finally a hard character cut.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", "。", ".", "、", ",", " ", ""];

/// Represents a chunk of a note with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The actual content of the chunk
    pub content: String,

    /// Vault-relative path of the owning document
    pub path: String,

    /// Ordinal position within the document (0, 1, 2...)
    pub index: usize,

    /// Offset of the first character within the document, in code points
    pub offset: usize,

    /// Link targets inherited from the owning document
    pub links: Vec<String>,
}

impl Chunk {
    /// Whether there is anything worth embedding
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Recursive separator chunker with fixed-size overlapping spans
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl Chunker {
    pub fn new(max_chars: usize, overlap: usize, separators: Vec<String>) -> Result<Self> {
        if max_chars == 0 {
            return Err(SyncError::Config("chunking.max_chars must be positive".into()));
        }
        if overlap >= max_chars {
            return Err(SyncError::Config(format!(
                "chunking.overlap ({overlap}) must be smaller than chunking.max_chars ({max_chars})"
            )));
        }

        let mut separators = separators;
        if !separators.iter().any(|s| s.is_empty()) {
            separators.push(String::new());
        }

        Ok(Self {
            max_chars,
            overlap,
            separators,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.max_chars, config.overlap, config.separators.clone())
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Overlapping spans of `text`, in document order
    pub fn spans<'a>(&self, text: &'a str) -> Spans<'a> {
        let pieces = splitter::split_pieces(text, &self.separators, self.max_chars);
        Spans::new(text, pieces, self.max_chars, self.overlap)
    }

    /// Chunk a document, attaching its path and link metadata to every chunk
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let links: Vec<String> = doc.links.iter().cloned().collect();

        self.spans(&doc.text)
            .map(|span| Chunk {
                content: span.text.to_string(),
                path: doc.relative.clone(),
                index: span.index,
                offset: span.offset,
                links: links.clone(),
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap: 100,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn chunker(max: usize, overlap: usize) -> Chunker {
        Chunker::new(
            max,
            overlap,
            DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    /// Stitch spans back together, skipping the part each span shares with the previous one
    fn reconstruct(spans: &[Span]) -> String {
        let mut out = String::new();
        let mut end = 0;
        for span in spans {
            assert!(span.offset <= end, "gap before span {}", span.index);
            out.extend(span.text.chars().skip(end - span.offset));
            end = end.max(span.char_end());
        }
        out
    }

    fn sample_text() -> String {
        let mut text = String::new();
        for p in 0..12 {
            text.push_str(&format!("# Heading {p}\n"));
            for s in 0..9 {
                text.push_str(&format!(
                    "Sentence {s} of paragraph {p}, with a clause, and a few more words. "
                ));
            }
            text.push_str("日本語の文です。もう一つの文、そして終わり。\n\n");
        }
        text.push_str(&"x".repeat(2500));
        text
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert_eq!(chunker(1000, 100).spans("").count(), 0);
    }

    #[test]
    fn test_short_text_single_span() {
        let spans: Vec<_> = chunker(1000, 100).spans("just a short note").collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "just a short note");
        assert_eq!(spans[0].offset, 0);
    }

    #[test]
    fn test_reconstruction() {
        let text = sample_text();
        for (max, overlap) in [(1000, 100), (200, 50), (37, 5), (10, 0)] {
            let spans: Vec<_> = chunker(max, overlap).spans(&text).collect();
            assert_eq!(reconstruct(&spans), text, "max={max} overlap={overlap}");
        }
    }

    #[test]
    fn test_span_size_and_overlap_bounds() {
        let text = sample_text();
        let spans: Vec<_> = chunker(200, 50).spans(&text).collect();

        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.char_len() <= 200);
        }
        for pair in spans.windows(2) {
            let shared = pair[0].char_end().saturating_sub(pair[1].offset);
            assert!(shared <= 50, "overlap {shared} too large");
            assert!(pair[1].offset > pair[0].offset);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let c = chunker(300, 40);
        let a: Vec<_> = c.spans(&text).collect();
        let b: Vec<_> = c.spans(&text).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_word_overlap() {
        let spans: Vec<_> = chunker(10, 4)
            .spans("one two three four five six")
            .map(|s| (s.text, s.offset))
            .collect();

        assert_eq!(
            spans,
            vec![
                ("one two ", 0),
                ("two three ", 4),
                ("four five ", 14),
                ("six", 24),
            ]
        );
    }

    #[test]
    fn test_hard_cut_fallback() {
        let spans: Vec<_> = chunker(4, 1)
            .spans("abcdefghij")
            .map(|s| s.text)
            .collect();
        assert_eq!(spans, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let spans: Vec<_> = chunker(5, 1)
            .spans("aaa\n\nbbb")
            .map(|s| s.text)
            .collect();
        assert_eq!(spans, vec!["aaa\n\n", "bbb"]);
    }

    #[test]
    fn test_iterator_is_fused() {
        let c = chunker(4, 1);
        let mut spans = c.spans("abcdefgh");
        while spans.next().is_some() {}
        assert!(spans.next().is_none());
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        assert!(Chunker::new(100, 100, vec![]).is_err());
        assert!(Chunker::new(0, 0, vec![]).is_err());
    }

    #[test]
    fn test_chunk_document_carries_metadata() {
        let mut doc = Document::new(
            PathBuf::from("/vault/notes/a.md"),
            "notes/a.md".to_string(),
            "the quick brown fox [[b]]".to_string(),
            SystemTime::UNIX_EPOCH,
        )
        .with_links();
        doc.links.insert("a".to_string());

        let chunks = chunker(1000, 100).chunk_document(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, "notes/a.md");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].links, vec!["a".to_string(), "b".to_string()]);
    }
}
