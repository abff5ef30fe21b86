//! Offset Index Module
//!
//! Everything the DOM and the editing layer share about locations in the
//! document text:
//!
//! - **Span**: half-open byte range `[start, end)` into the text. Node names,
//!   attribute values and node extents are all spans, never copies.
//! - **PositionIndex**: the text buffer plus its line-start table, converting
//!   between byte offsets and editor positions (line, UTF-16 column) and
//!   applying incremental edits.
//!
//! ## Offsets
//!
//! ```text
//! "<a>\r\n  <b/>"
//!  0123 4 5678..
//!  line 0 = [0, 5)    line 1 = [5, 11)
//! ```

pub mod position;
pub mod span;

pub use position::{utf16_len, PositionIndex};
pub use span::Span;
