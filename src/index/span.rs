//! Span - byte range into the document text
//!
//! Zero-copy reference to a portion of the input document.
//! Used for element names, attribute names/values, text content and
//! every node's extent.

/// A half-open byte range `[start, end)` into the document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Byte offset of the first byte
    pub start: usize,
    /// Byte offset one past the last byte
    pub end: usize,
}

impl Span {
    /// Create a new span
    #[inline]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes
    #[inline]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if this span is empty
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Check whether `offset` lies inside the span, both ends inclusive.
    ///
    /// Editor requests address the gap before or after a character, so a
    /// cursor sitting right after `>` still touches the node.
    #[inline]
    pub const fn touches(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    /// Check whether `offset` lies strictly inside the span
    #[inline]
    pub const fn contains(&self, offset: usize) -> bool {
        self.start < offset && offset < self.end
    }

    /// Check whether `other` is fully inside this span
    #[inline]
    pub const fn covers(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Extract as string from input
    #[inline]
    pub fn as_str<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end).unwrap_or("")
    }

    /// The span without one surrounding quote character on each side.
    ///
    /// A missing closing quote (unterminated literal) keeps the end.
    pub fn unquoted(&self, input: &str) -> Span {
        let text = self.as_str(input);
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(&q @ (b'"' | b'\'')) => {
                let end = if bytes.len() > 1 && bytes[bytes.len() - 1] == q {
                    self.end - 1
                } else {
                    self.end
                };
                Span::new(self.start + 1, end)
            }
            _ => *self,
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}
