use std::collections::VecDeque;
use std::iter::FusedIterator;

/// A contiguous slice of the source text, never longer than the span limit
#[derive(Debug, Clone, Copy)]
pub(crate) struct Piece {
    start: usize,
    end: usize,
    char_start: usize,
    chars: usize,
}

/// One overlapping span of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub text: &'a str,

    /// Offset of the first character, in code points
    pub offset: usize,

    /// Ordinal position within the document
    pub index: usize,
}

impl Span<'_> {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn char_end(&self) -> usize {
        self.offset + self.char_len()
    }
}

/// Break `text` into pieces of at most `max` code points.
///
/// Uses the first separator that occurs in the text; separators stay attached to the
/// end of the preceding piece so the pieces cover the text exactly. Pieces that are
/// still too long are split again with the remaining separators. An empty separator
/// cuts single characters.
pub(crate) fn split_pieces(text: &str, separators: &[String], max: usize) -> Vec<Piece> {
    let mut out = Vec::new();
    split_into(text, 0, 0, separators, max, &mut out);
    out
}

fn split_into(
    text: &str,
    base: usize,
    char_base: usize,
    separators: &[String],
    max: usize,
    out: &mut Vec<Piece>,
) {
    if text.is_empty() {
        return;
    }

    let chosen = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep.as_str()));

    let Some(level) = chosen else {
        // Nothing left to split on
        out.push(Piece {
            start: base,
            end: base + text.len(),
            char_start: char_base,
            chars: text.chars().count(),
        });
        return;
    };

    let separator = separators[level].as_str();
    let rest = &separators[level + 1..];

    if separator.is_empty() {
        for (i, (pos, ch)) in text.char_indices().enumerate() {
            out.push(Piece {
                start: base + pos,
                end: base + pos + ch.len_utf8(),
                char_start: char_base + i,
                chars: 1,
            });
        }
        return;
    }

    let mut start = 0;
    let mut char_pos = char_base;
    let mut emit = |part_start: usize, part_end: usize, char_pos: &mut usize| {
        let part = &text[part_start..part_end];
        let chars = part.chars().count();
        if chars <= max {
            out.push(Piece {
                start: base + part_start,
                end: base + part_end,
                char_start: *char_pos,
                chars,
            });
        } else {
            split_into(part, base + part_start, *char_pos, rest, max, out);
        }
        *char_pos += chars;
    };

    for (pos, matched) in text.match_indices(separator) {
        let end = pos + matched.len();
        emit(start, end, &mut char_pos);
        start = end;
    }
    if start < text.len() {
        emit(start, text.len(), &mut char_pos);
    }
}

/// Lazily packs pieces into spans of at most `max` code points, carrying up to
/// `overlap` code points of trailing pieces into the next span.
///
/// The sequence is finite and cannot be restarted; call `Chunker::spans` again for a
/// fresh pass.
pub struct Spans<'a> {
    text: &'a str,
    pieces: std::vec::IntoIter<Piece>,
    window: VecDeque<Piece>,
    total: usize,
    pending: Option<Piece>,
    max: usize,
    overlap: usize,
    index: usize,
}

impl<'a> Spans<'a> {
    pub(crate) fn new(text: &'a str, pieces: Vec<Piece>, max: usize, overlap: usize) -> Self {
        Self {
            text,
            pieces: pieces.into_iter(),
            window: VecDeque::new(),
            total: 0,
            pending: None,
            max,
            overlap,
            index: 0,
        }
    }

    fn current_span(&mut self) -> Option<Span<'a>> {
        let first = self.window.front()?;
        let last = self.window.back()?;
        let span = Span {
            text: &self.text[first.start..last.end],
            offset: first.char_start,
            index: self.index,
        };
        self.index += 1;
        Some(span)
    }
}

impl<'a> Iterator for Spans<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        loop {
            let Some(piece) = self.pending.take().or_else(|| self.pieces.next()) else {
                let span = self.current_span();
                self.window.clear();
                self.total = 0;
                return span;
            };

            if self.total + piece.chars > self.max && !self.window.is_empty() {
                let span = self.current_span();

                // Keep a tail of at most `overlap` chars that still leaves room for `piece`
                while self.total > self.overlap
                    || (self.total + piece.chars > self.max && self.total > 0)
                {
                    match self.window.pop_front() {
                        Some(dropped) => self.total -= dropped.chars,
                        None => break,
                    }
                }

                self.pending = Some(piece);
                return span;
            }

            self.total += piece.chars;
            self.window.push_back(piece);
        }
    }
}

impl FusedIterator for Spans<'_> {}
