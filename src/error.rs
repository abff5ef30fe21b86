//! Error types
//!
//! Syntax problems in the edited document are never errors: the tokenizer and
//! the DOM builder always produce a tree. What remains are position lookups
//! that fall outside the text, grammar resources that cannot be loaded, and
//! cooperative cancellation of grammar work.

use thiserror::Error;

/// Offset or position outside the indexed text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("offset {offset} is outside the text (length {len})")]
    OutOfRange { offset: usize, len: usize },

    #[error("line {line} is outside the text ({line_count} lines)")]
    LineOutOfRange { line: u32, line_count: usize },

    #[error("offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Failure to resolve, fetch or adapt a grammar resource.
///
/// Shared between every caller waiting on the same load, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("cannot read '{uri}': {message}")]
    Io { uri: String, message: String },

    #[error("cannot resolve grammar location '{0}'")]
    Unresolved(String),

    #[error("download is disabled, '{0}' was not fetched")]
    DownloadDisabled(String),

    #[error("malformed grammar '{uri}': {message}")]
    Malformed { uri: String, message: String },

    #[error("unsupported grammar dialect for '{0}'")]
    Unsupported(String),

    #[error("grammar loading was cancelled")]
    Cancelled,
}

impl GrammarError {
    pub(crate) fn malformed(uri: &str, message: impl ToString) -> Self {
        GrammarError::Malformed {
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn io(uri: &str, err: &std::io::Error) -> Self {
        GrammarError::Io {
            uri: uri.to_string(),
            message: err.to_string(),
        }
    }
}

/// Cooperative cancellation observed at a safe point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

impl From<Cancelled> for GrammarError {
    fn from(_: Cancelled) -> Self {
        GrammarError::Cancelled
    }
}

/// Crate-level error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl Error {
    /// Cancellation is a non-error outcome; callers discard partial results.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled(_) | Error::Grammar(GrammarError::Cancelled)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
