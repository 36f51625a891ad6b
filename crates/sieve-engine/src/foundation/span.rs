//! Source location tracking for error reporting and debugging.
//!
//! Sieve diagnostics are reported as `(script, line, column)` triples, so the
//! engine keeps positions in that shape rather than as byte ranges. The lexer
//! produces byte offsets; [`LineIndex`] converts them once, at parse time.

use serde::{Deserialize, Serialize};

/// A `(line, column)` position in a script. Both components are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Position used for messages that have no meaningful location.
    pub fn zero() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Byte-offset to line/column conversion for one source text.
///
/// `line_starts[0]` is always 0; an EOF sentinel is appended so the last
/// line has a well-defined end.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (idx, ch) in source.char_indices() {
            if ch == '\n' {
                line_starts.push((idx + 1) as u32);
            }
        }
        if line_starts.last() != Some(&(source.len() as u32)) {
            line_starts.push(source.len() as u32);
        }
        Self { line_starts }
    }

    /// Convert a byte offset into a 1-based `(line, column)` span.
    ///
    /// Offsets past EOF are clamped to the last line.
    pub fn position(&self, offset: usize) -> Span {
        let offset = offset as u32;
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        // The sentinel entry is not a line of its own.
        let line_idx = line_idx.min(self.line_starts.len().saturating_sub(2));
        Span {
            line: (line_idx + 1) as u32,
            column: offset.saturating_sub(self.line_starts[line_idx]) + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_maps_offsets_to_lines() {
        let index = LineIndex::new("keep;\nstop;\n");
        assert_eq!(index.position(0), Span::new(1, 1));
        assert_eq!(index.position(5), Span::new(1, 6));
        assert_eq!(index.position(6), Span::new(2, 1));
        assert_eq!(index.position(10), Span::new(2, 5));
    }

    #[test]
    fn position_clamps_past_eof() {
        let index = LineIndex::new("keep;");
        assert_eq!(index.position(100).line, 1);
    }

    #[test]
    fn empty_source() {
        let index = LineIndex::new("");
        assert_eq!(index.position(0), Span::new(1, 1));
    }
}
