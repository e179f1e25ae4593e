//! Unified error type for the replay core.
//!
//! Defines [`StrataError`], returned by pipeline configuration, item
//! consumption, and result serialization. Variants map one-to-one onto the
//! failure classes the executor distinguishes: configuration errors are fatal
//! at plan time, integrity errors are fatal for the run (they indicate that a
//! tree diff and a file diff disagree about the same commit), and tick-size
//! mismatches are ordinary result values a user can act on.
//!
//! Binary-file "failures" never reach this type — the engine swallows them
//! and skips the change.

use std::fmt;
use std::path::PathBuf;

use strata_git::{GitError, Oid};

// ---------------------------------------------------------------------------
// StrataError
// ---------------------------------------------------------------------------

/// Unified error type for replay operations.
#[derive(Debug)]
pub enum StrataError {
    /// The pipeline cannot be planned: a cycle, a missing fact provider, or
    /// an invalid option.
    Configuration {
        /// What is wrong with the requested configuration.
        message: String,
    },

    /// The replayed state disagrees with the facts fed to it — e.g. a tracked
    /// file's length does not match the diff that claims to modify it.
    ///
    /// Always fatal: continuing would corrupt every later measurement. Carries
    /// both blob identifiers so the offending commit can be reproduced with
    /// `git diff <from> <to>`.
    Integrity {
        /// Path of the file whose state is inconsistent.
        path: String,
        /// Blob id on the parent side ([`Oid::ZERO`] when absent).
        from_blob: Oid,
        /// Blob id on the commit side ([`Oid::ZERO`] when absent).
        to_blob: Oid,
        /// Human-readable description of the mismatch.
        detail: String,
    },

    /// Two results cannot be combined because they were produced with
    /// different tick sizes.
    TickSizeMismatch {
        /// Tick size of the left result, in seconds.
        left: i64,
        /// Tick size of the right result, in seconds.
        right: i64,
    },

    /// `consume` was called on a hibernated analysis.
    Hibernated {
        /// Name of the pipeline item that was still hibernated.
        item: String,
    },

    /// Reading from the repository failed.
    Git(GitError),

    /// An I/O error with the path it occurred on (hibernation image, output
    /// file).
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

impl StrataError {
    /// Shorthand for a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// `true` when this error must abort the whole run rather than a single
    /// commit on a single branch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Configuration { .. }
            | Self::Integrity { .. }
            | Self::Hibernated { .. }
            | Self::Io { .. } => true,
            Self::TickSizeMismatch { .. } | Self::Git(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for StrataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Self::Integrity {
                path,
                from_blob,
                to_blob,
                detail,
            } => {
                write!(
                    f,
                    "integrity error at '{path}': {detail} (blobs {from_blob} -> {to_blob})"
                )
            }
            Self::TickSizeMismatch { left, right } => {
                write!(
                    f,
                    "cannot combine results with different tick sizes ({left}s vs {right}s); \
                     re-run both analyses with the same --tick-size"
                )
            }
            Self::Hibernated { item } => {
                write!(
                    f,
                    "'{item}' consumed a commit while hibernated; boot() must run first"
                )
            }
            Self::Git(err) => write!(f, "{err}"),
            Self::Io { path, source } => {
                write!(f, "I/O error on '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StrataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Git(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<GitError> for StrataError {
    fn from(err: GitError) -> Self {
        Self::Git(err)
    }
}

/// The core result alias.
pub type Result<T> = std::result::Result<T, StrataError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_configuration() {
        let err =
            StrataError::config("item 'burndown' requires fact 'tick' but nothing provides it");
        let msg = format!("{err}");
        assert!(msg.contains("configuration error"));
        assert!(msg.contains("burndown"));
    }

    #[test]
    fn display_integrity_includes_blobs() {
        let err = StrataError::Integrity {
            path: "src/lib.rs".to_owned(),
            from_blob: Oid::from_bytes([0xaa; 20]),
            to_blob: Oid::from_bytes([0xbb; 20]),
            detail: "tree length 10 != old_loc 12".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("src/lib.rs"));
        assert!(msg.contains(&"aa".repeat(20)));
        assert!(msg.contains(&"bb".repeat(20)));
        assert!(msg.contains("10"));
    }

    #[test]
    fn display_tick_mismatch_suggests_fix() {
        let err = StrataError::TickSizeMismatch {
            left: 86400,
            right: 3600,
        };
        let msg = format!("{err}");
        assert!(msg.contains("86400"));
        assert!(msg.contains("3600"));
        assert!(msg.contains("--tick-size"));
    }

    #[test]
    fn fatality_classification() {
        assert!(StrataError::config("x").is_fatal());
        assert!(
            StrataError::Hibernated {
                item: "burndown".to_owned()
            }
            .is_fatal()
        );
        assert!(!StrataError::TickSizeMismatch { left: 1, right: 2 }.is_fatal());
    }

    #[test]
    fn io_source_preserved() {
        let err = StrataError::Io {
            path: PathBuf::from("/tmp/arena.bin"),
            source: std::io::Error::other("disk full"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(format!("{err}").contains("arena.bin"));
    }
}
