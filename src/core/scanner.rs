//! SIMD-accelerated byte cursor using memchr
//!
//! The tokenizer drives this cursor over the UTF-8 bytes of the document.
//! Every stop position it produces lies on an ASCII delimiter or at the end of
//! input, so positions are always valid `str` boundaries. The single exception,
//! stepping over an unrecognised character, goes through [`Scanner::advance_char`].

use memchr::{memchr, memchr2, memchr3, memmem};

/// Byte cursor for the tolerant XML tokenizer
pub struct Scanner<'a> {
    text: &'a str,
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Create a new cursor at the start of `text`
    #[inline]
    pub fn new(text: &'a str) -> Self {
        Self::with_offset(text, 0)
    }

    /// Create a new cursor at `offset` (clamped to the input length)
    #[inline]
    pub fn with_offset(text: &'a str, offset: usize) -> Self {
        Scanner {
            text,
            input: text.as_bytes(),
            pos: offset.min(text.len()),
        }
    }

    /// Get the current position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if we've reached the end
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Get the text between two positions
    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        self.text.get(start..end).unwrap_or("")
    }

    /// Peek at current byte without advancing
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Peek at byte at offset from current position
    #[inline]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advance by n bytes, never past the end
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Advance over one whole character
    pub fn advance_char(&mut self) {
        let width = match self.peek() {
            None => 0,
            Some(b) if b < 0x80 => 1,
            Some(b) if b >= 0xF0 => 4,
            Some(b) if b >= 0xE0 => 3,
            Some(b) if b >= 0xC0 => 2,
            Some(_) => 1,
        };
        self.advance(width);
        while self.pos < self.input.len() && !self.text.is_char_boundary(self.pos) {
            self.pos += 1;
        }
    }

    /// Consume `b` if it is the current byte
    #[inline]
    pub fn advance_if_byte(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume `needle` if the input continues with it
    #[inline]
    pub fn advance_if_bytes(&mut self, needle: &[u8]) -> bool {
        if self.starts_with(needle) {
            self.pos += needle.len();
            true
        } else {
            false
        }
    }

    /// Check if input starts with a byte sequence at current position
    #[inline]
    pub fn starts_with(&self, needle: &[u8]) -> bool {
        self.input[self.pos..].starts_with(needle)
    }

    /// Move to the next `b`, or to the end of input. Returns whether `b` was found.
    #[inline]
    pub fn advance_until_byte(&mut self, b: u8) -> bool {
        match memchr(b, &self.input[self.pos..]) {
            Some(i) => {
                self.pos += i;
                true
            }
            None => {
                self.pos = self.input.len();
                false
            }
        }
    }

    /// Move to the next occurrence of `needle`, or to the end of input
    pub fn advance_until_bytes(&mut self, needle: &[u8]) -> bool {
        match memmem::find(&self.input[self.pos..], needle) {
            Some(i) => {
                self.pos += i;
                true
            }
            None => {
                self.pos = self.input.len();
                false
            }
        }
    }

    /// Move to the next `b` or `<`, whichever comes first
    #[inline]
    pub fn advance_until_byte_or_new_tag(&mut self, b: u8) -> bool {
        match memchr2(b, b'<', &self.input[self.pos..]) {
            Some(i) => {
                self.pos += i;
                true
            }
            None => {
                self.pos = self.input.len();
                false
            }
        }
    }

    /// Move to the next occurrence of `needle` or `<`, whichever comes first
    pub fn advance_until_bytes_or_new_tag(&mut self, needle: &[u8]) -> bool {
        let Some(&first) = needle.first() else {
            return true;
        };
        while let Some(i) = memchr2(first, b'<', &self.input[self.pos..]) {
            self.pos += i;
            if self.input[self.pos] == b'<' || self.starts_with(needle) {
                return true;
            }
            self.pos += 1;
        }
        self.pos = self.input.len();
        false
    }

    /// Move to the first byte contained in `stops`
    pub fn advance_until_any_of(&mut self, stops: &[u8]) -> bool {
        let found = match stops {
            [a] => memchr(*a, &self.input[self.pos..]),
            [a, b] => memchr2(*a, *b, &self.input[self.pos..]),
            [a, b, c] => memchr3(*a, *b, *c, &self.input[self.pos..]),
            _ => self.input[self.pos..].iter().position(|b| stops.contains(b)),
        };
        match found {
            Some(i) => {
                self.pos += i;
                true
            }
            None => {
                self.pos = self.input.len();
                false
            }
        }
    }

    /// Skip whitespace characters (space, tab, newline, carriage return)
    #[inline]
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
        self.pos > start
    }

    /// Read an XML name (starts with letter/underscore/colon, continues with name chars)
    pub fn read_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if !self.peek().is_some_and(is_name_start_char) {
            return None;
        }
        self.pos += 1;
        while self.pos < self.input.len() && is_name_char(self.input[self.pos]) {
            self.pos += 1;
        }
        Some(self.slice(start, self.pos))
    }

    /// Read an attribute name: anything up to whitespace, a quote, `<`, `>`, `/` or `=`
    pub fn read_attribute_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while self.pos < self.input.len() && !is_attribute_name_stop(self.input[self.pos]) {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.slice(start, self.pos))
    }

    /// Read an unquoted attribute value
    pub fn read_unquoted_value(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while self.pos < self.input.len()
            && !matches!(
                self.input[self.pos],
                b' ' | b'\t' | b'\n' | b'\r' | b'"' | b'\'' | b'`' | b'=' | b'<' | b'>'
            )
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.slice(start, self.pos))
    }

    /// Read a quoted literal including its quotes.
    ///
    /// A literal missing its closing quote runs to the end of input.
    pub fn read_quoted(&mut self) -> Option<&'a str> {
        let quote = self.peek().filter(|q| *q == b'"' || *q == b'\'')?;
        let start = self.pos;
        self.pos += 1;
        if self.advance_until_byte(quote) {
            self.pos += 1;
        }
        Some(self.slice(start, self.pos))
    }

    /// Read a balanced parenthesised group such as a DTD content model,
    /// including a trailing `?`, `*` or `+`.
    ///
    /// An unbalanced group stops before the first byte in `stops`.
    pub fn read_group(&mut self, stops: &[u8]) -> Option<&'a str> {
        if self.peek() != Some(b'(') {
            return None;
        }
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                return Some(self.slice(start, self.pos));
            }
            self.pos += 1;
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        if matches!(self.peek(), Some(b'?' | b'*' | b'+')) {
                            self.pos += 1;
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        Some(self.slice(start, self.pos))
    }
}

/// Check if byte is valid XML name start character
/// Allows ASCII letters, underscore, colon, and non-ASCII (UTF-8 Unicode)
#[inline]
pub(crate) fn is_name_start_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'_' | b':') || b >= 0x80
}

/// Check if byte is valid XML name character
/// Allows ASCII alphanumeric, punctuation, and non-ASCII (UTF-8 Unicode)
#[inline]
pub(crate) fn is_name_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b':') || b >= 0x80
}

#[inline]
fn is_attribute_name_stop(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t' | b'\n' | b'\r' | b'"' | b'\'' | b'<' | b'>' | b'/' | b'='
    ) || b < 0x10
        || b == 0x7F
}
