//! Error types for git history access.
//!
//! [`GitError`] is the single error type returned by all
//! [`HistoryRepo`](crate::HistoryRepo) trait methods. It uses rich enum
//! variants so callers can match on specific failure modes (missing object,
//! unreadable history, I/O) without parsing error messages.

use thiserror::Error;

/// Errors returned by [`HistoryRepo`](crate::HistoryRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested object or ref was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// The commit graph could not be walked (corrupt object, broken chain).
    #[error("history walk failed: {message}")]
    Traversal {
        /// Details about the failure.
        message: String,
    },

    /// A tree-to-tree diff failed.
    #[error("tree diff of {commit} failed: {message}")]
    Diff {
        /// The commit whose diff was requested (hex).
        commit: String,
        /// Details about the failure.
        message: String,
    },

    /// An I/O error occurred while reading the object database.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying git backend returned an unclassified error.
    ///
    /// The catch-all for errors that don't fit other variants; `message`
    /// should include enough context to diagnose the failure.
    #[error("git backend error: {message}")]
    Backend {
        /// Freeform error description from the backend.
        message: String,
    },
}
