//! Position Index - line table over the document text
//!
//! Owns the text buffer together with a monotone table of line-start
//! offsets and converts between document offsets and editor positions.
//!
//! Offsets are byte offsets into the UTF-8 text. Positions follow the editing
//! protocol: `line` is zero-based, `character` counts UTF-16 code units
//! (characters outside the BMP count as 2). Line breaks are `\n`, `\r\n`
//! and a lone `\r`.
//!
//! Invariant: offset `i` belongs to line `k` iff
//! `line_starts[k] <= i < line_starts[k + 1]`.

use lsp_types::{Position, Range, TextDocumentContentChangeEvent};

use super::span::Span;
use crate::error::PositionError;

/// Text buffer plus line-start table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionIndex {
    text: String,
    line_starts: Vec<usize>,
}

impl PositionIndex {
    /// Index a full text
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = compute_line_starts(&text);
        PositionIndex { text, line_starts }
    }

    /// The indexed text
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the text in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of lines (an empty text has one line)
    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// The line-start table
    #[inline]
    pub fn line_starts(&self) -> &[usize] {
        &self.line_starts
    }

    /// Line containing `offset` (offsets past the end map to the last line)
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1)
    }

    /// Byte range of `line` without its line break
    pub fn line_content(&self, line: usize) -> Option<Span> {
        let start = *self.line_starts.get(line)?;
        let mut end = self.line_end(line);
        let bytes = self.text.as_bytes();
        if end > start && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        Some(Span::new(start, end))
    }

    /// Start of the next line, or the text length on the last line
    #[inline]
    fn line_end(&self, line: usize) -> usize {
        self.line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Convert an editor position into a document offset.
    ///
    /// A `character` past the end of its line clamps to the end of the line
    /// content; a position inside a surrogate pair rounds down to the
    /// character start.
    pub fn offset_at(&self, position: Position) -> Result<usize, PositionError> {
        let line = position.line as usize;
        let Some(content) = self.line_content(line) else {
            return Err(PositionError::LineOutOfRange {
                line: position.line,
                line_count: self.line_count(),
            });
        };
        let line_end = self.line_end(line);
        let target = position.character as usize;
        let mut units = 0usize;
        for (i, ch) in self.text[content.start..line_end].char_indices() {
            if units == target {
                return Ok(content.start + i);
            }
            units += ch.len_utf16();
            if units > target {
                return Ok(content.start + i);
            }
        }
        if units == target && line_end == self.text.len() {
            return Ok(line_end);
        }
        Ok(content.end)
    }

    /// Convert a document offset into an editor position
    pub fn position_at(&self, offset: usize) -> Result<Position, PositionError> {
        self.check_offset(offset)?;
        let line = self.line_of(offset);
        let start = self.line_starts[line];
        let character = utf16_len(&self.text[start..offset]);
        Ok(Position::new(line as u32, character as u32))
    }

    /// Convert a span into an editor range
    pub fn range_at(&self, span: Span) -> Result<Range, PositionError> {
        Ok(Range::new(
            self.position_at(span.start)?,
            self.position_at(span.end)?,
        ))
    }

    /// Convert an editor range into a span
    pub fn span_at(&self, range: Range) -> Result<Span, PositionError> {
        let start = self.offset_at(range.start)?;
        let end = self.offset_at(range.end)?;
        Ok(if end < start {
            Span::new(end, start)
        } else {
            Span::new(start, end)
        })
    }

    /// Protocol-absolute UTF-16 offset of a document offset
    pub fn utf16_offset(&self, offset: usize) -> Result<usize, PositionError> {
        self.check_offset(offset)?;
        Ok(utf16_len(&self.text[..offset]))
    }

    /// Document offset of a protocol-absolute UTF-16 offset
    pub fn offset_from_utf16(&self, utf16_offset: usize) -> Result<usize, PositionError> {
        let mut units = 0usize;
        for (i, ch) in self.text.char_indices() {
            if units >= utf16_offset {
                return Ok(i);
            }
            units += ch.len_utf16();
        }
        if units >= utf16_offset {
            return Ok(self.text.len());
        }
        Err(PositionError::OutOfRange {
            offset: utf16_offset,
            len: units,
        })
    }

    fn check_offset(&self, offset: usize) -> Result<(), PositionError> {
        if offset > self.text.len() {
            return Err(PositionError::OutOfRange {
                offset,
                len: self.text.len(),
            });
        }
        if !self.text.is_char_boundary(offset) {
            return Err(PositionError::NotCharBoundary(offset));
        }
        Ok(())
    }

    /// Replace the whole text and rebuild the line table
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.line_starts = compute_line_starts(&self.text);
    }

    /// Apply content changes in order.
    ///
    /// A change without a range replaces the whole text. A ranged change is
    /// resolved against the text left by the previous change. On error the
    /// index is left as it was before the call.
    pub fn update(&mut self, changes: &[TextDocumentContentChangeEvent]) -> Result<(), PositionError> {
        if let [change] = changes {
            // `apply_edit` validates before mutating
            return self.apply_change(change);
        }
        let mut next = self.clone();
        for change in changes {
            next.apply_change(change)?;
        }
        *self = next;
        Ok(())
    }

    fn apply_change(&mut self, change: &TextDocumentContentChangeEvent) -> Result<(), PositionError> {
        match change.range {
            Some(range) => self.apply_edit(range, &change.text),
            None => {
                self.set_text(change.text.as_str());
                Ok(())
            }
        }
    }

    /// Replace `range` with `new_text`, patching the line table locally
    pub fn apply_edit(&mut self, range: Range, new_text: &str) -> Result<(), PositionError> {
        let Span { start, end } = self.span_at(range)?;

        // Line breaks that may merge or split with the edit lie between the
        // start of the line before `start` and two bytes past `end`.
        let keep = self.line_of(start).saturating_sub(1);
        let rescan_from = self.line_starts[keep];
        let tail = self.line_starts.partition_point(|&s| s < end + 2);

        self.text.replace_range(start..end, new_text);
        let removed = end - start;
        let inserted = new_text.len();
        for s in &mut self.line_starts[tail..] {
            *s = *s + inserted - removed;
        }

        let rescan_to = self
            .line_starts
            .get(tail)
            .map_or(self.text.len(), |&s| s - 1);
        let mut fresh = Vec::new();
        push_line_breaks(&self.text, rescan_from, rescan_to, &mut fresh);
        self.line_starts.splice(keep + 1..tail, fresh);
        Ok(())
    }
}

/// Count UTF-16 code units of a string slice
#[inline]
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    push_line_breaks(text, 0, text.len(), &mut starts);
    starts
}

/// Push the start of every line whose break begins in `[from, to)`
fn push_line_breaks(text: &str, from: usize, to: usize, out: &mut Vec<usize>) {
    let bytes = text.as_bytes();
    let mut pos = from;
    while let Some(i) = memchr::memchr2(b'\n', b'\r', &bytes[pos..to]) {
        let p = pos + i;
        if bytes[p] == b'\n' || bytes.get(p + 1) != Some(&b'\n') {
            out.push(p + 1);
        }
        pos = p + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn change(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(sl, sc), Position::new(el, ec))),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[rstest]
    #[case("", vec![0])]
    #[case("a\nb", vec![0, 2])]
    #[case("a\r\nb\rc\n", vec![0, 3, 5, 7])]
    #[case("\n\n", vec![0, 1, 2])]
    fn test_line_starts(#[case] text: &str, #[case] expected: Vec<usize>) {
        assert_eq!(PositionIndex::new(text).line_starts(), expected.as_slice());
    }

    #[test]
    fn test_position_at_counts_utf16() {
        let index = PositionIndex::new("a\u{1F600}b\nxé");
        assert_eq!(index.position_at(5).unwrap(), Position::new(0, 3));
        assert_eq!(index.position_at(7).unwrap(), Position::new(1, 0));
        assert_eq!(index.position_at(8).unwrap(), Position::new(1, 1));
        assert_eq!(index.position_at(10).unwrap(), Position::new(1, 2));
        assert_eq!(
            index.position_at(3),
            Err(PositionError::NotCharBoundary(3))
        );
        assert_eq!(
            index.position_at(11),
            Err(PositionError::OutOfRange { offset: 11, len: 10 })
        );
    }

    #[test]
    fn test_offset_at_clamps_character() {
        let index = PositionIndex::new("ab\ncd");
        assert_eq!(index.offset_at(Position::new(0, 99)).unwrap(), 2);
        assert_eq!(index.offset_at(Position::new(1, 99)).unwrap(), 5);
        assert!(matches!(
            index.offset_at(Position::new(2, 0)),
            Err(PositionError::LineOutOfRange { line: 2, .. })
        ));
    }

    #[test]
    fn test_round_trip_every_offset() {
        let text = "<a>\r\n  <b x=\"\u{1F600}\"/>\r\té\n\r\n</a>";
        let index = PositionIndex::new(text);
        for offset in (0..=text.len()).filter(|o| text.is_char_boundary(*o)) {
            let position = index.position_at(offset).unwrap();
            assert_eq!(index.offset_at(position).unwrap(), offset, "offset {offset}");
        }
    }

    #[test]
    fn test_utf16_offsets() {
        let index = PositionIndex::new("\u{1F600}x");
        assert_eq!(index.utf16_offset(4).unwrap(), 2);
        assert_eq!(index.offset_from_utf16(2).unwrap(), 4);
        assert_eq!(index.offset_from_utf16(3).unwrap(), 5);
        assert!(index.offset_from_utf16(4).is_err());
    }

    #[test]
    fn test_update_applies_changes_sequentially() {
        let mut index = PositionIndex::new("hello\nworld");
        index
            .update(&[
                change(0, 0, 0, 5, "bye"),
                // Expressed against "bye\nworld"
                change(1, 0, 1, 0, "new\n"),
            ])
            .unwrap();
        assert_eq!(index.text(), "bye\nnew\nworld");
        assert_eq!(index.line_starts(), &[0, 4, 8]);
    }

    #[test]
    fn test_update_failing_change_keeps_previous_text() {
        let mut index = PositionIndex::new("abc");
        let err = index
            .update(&[change(0, 0, 0, 0, "X"), change(9, 0, 9, 0, "Y")])
            .unwrap_err();
        assert!(matches!(err, PositionError::LineOutOfRange { .. }));
        assert_eq!(index.text(), "abc");
        assert_eq!(index.line_starts(), &[0]);

        index.update(&[change(0, 0, 0, 0, "X"), change(0, 4, 0, 4, "\nZ")]).unwrap();
        assert_eq!(index.text(), "Xabc\nZ");
        assert_eq!(index.line_starts(), &[0, 5]);
    }

    #[test]
    fn test_update_full_replace() {
        let mut index = PositionIndex::new("a");
        index
            .update(&[TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "x\ny".to_string(),
            }])
            .unwrap();
        assert_eq!(index.line_starts(), &[0, 2]);
    }

    #[test]
    fn test_update_joins_carriage_return_and_line_feed() {
        let mut index = PositionIndex::new("a\rb");
        assert_eq!(index.line_starts(), &[0, 2]);
        // Replace "b" with "\nb": "\r" and "\n" now form one break
        index.apply_edit(Range::new(Position::new(1, 0), Position::new(1, 0)), "\n").unwrap();
        assert_eq!(index.text(), "a\r\nb");
        assert_eq!(index.line_starts(), &[0, 3]);

        // Split the pair again
        index.apply_edit(Range::new(Position::new(0, 2), Position::new(0, 2)), "x").unwrap();
        assert_eq!(index.text(), "a\rx\nb");
        assert_eq!(index.line_starts(), PositionIndex::new("a\rx\nb").line_starts());
    }

    #[test]
    fn test_update_out_of_range_fails() {
        let mut index = PositionIndex::new("abc");
        assert!(index.update(&[change(3, 0, 3, 0, "x")]).is_err());
        assert_eq!(index.text(), "abc");
    }

    /// Deterministic generator for edit sequences
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound.max(1)
        }
    }

    #[test]
    fn test_incremental_matches_full_reindex() {
        let pieces = ["", "a", "\n", "\r", "\r\n", "é", "\u{1F600}", "<x>", "\n\r"];
        let mut rng = Lcg(7);
        let mut index = PositionIndex::new("<root>\r\n  <a/>\n\r</root>");
        for _ in 0..2000 {
            let a = index.position_at(random_offset(&index, &mut rng)).unwrap();
            let b = index.position_at(random_offset(&index, &mut rng)).unwrap();
            let text: String = (0..rng.next(3))
                .map(|_| pieces[rng.next(pieces.len())])
                .collect();
            index.apply_edit(Range::new(a, b), &text).unwrap();

            let fresh = PositionIndex::new(index.text());
            assert_eq!(index.line_starts(), fresh.line_starts(), "text {:?}", index.text());
            let probe = random_offset(&index, &mut rng);
            assert_eq!(index.position_at(probe), fresh.position_at(probe));
        }
    }

    fn random_offset(index: &PositionIndex, rng: &mut Lcg) -> usize {
        let mut offset = rng.next(index.len() + 1);
        while !index.text().is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}
