//! Core types for the strata git access layer.
//!
//! These types form the vocabulary shared between the
//! [`HistoryRepo`](crate::HistoryRepo) trait and the analysis core. They
//! intentionally contain no gix types — the backend is an implementation
//! detail.

use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Oid
// ---------------------------------------------------------------------------

/// A git object identifier (SHA-1, 20 bytes).
///
/// Stored as raw bytes for cheap comparison, hashing, and Copy semantics.
/// Displays as 40 lowercase hex characters. Doubles as the content-addressed
/// identifier carried by every tracked file in the line engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// The zero OID, used as a sentinel for "no blob on this side".
    pub const ZERO: Self = Self([0; 20]);

    /// Create an `Oid` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Return `true` if this is the zero OID.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({self})")
    }
}

impl FromStr for Oid {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(OidParseError {
                value: s.to_owned(),
                reason: format!("expected 40 hex characters, got {}", s.len()),
            });
        }
        let mut bytes = [0u8; 20];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_digit(chunk[0]).ok_or_else(|| OidParseError {
                value: s.to_owned(),
                reason: format!("invalid hex digit '{}'", chunk[0] as char),
            })?;
            let lo = hex_digit(chunk[1]).ok_or_else(|| OidParseError {
                value: s.to_owned(),
                reason: format!("invalid hex digit '{}'", chunk[1] as char),
            })?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

/// Error from parsing a hex string into an [`Oid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidParseError {
    /// The raw value that failed.
    pub value: String,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for OidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OID {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for OidParseError {}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// CommitNode
// ---------------------------------------------------------------------------

/// One commit of the replayed DAG.
///
/// Produced by [`HistoryRepo::load_history`](crate::HistoryRepo::load_history)
/// in topological order (parents strictly before children, commit time as the
/// tie-break), which is the order the pipeline executor consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNode {
    /// The commit OID.
    pub id: Oid,
    /// Parent OIDs, first parent first. Empty for root commits.
    pub parents: Vec<Oid>,
    /// Author name as recorded in the commit signature.
    pub author_name: String,
    /// Author email as recorded in the commit signature.
    pub author_email: String,
    /// Author time, seconds since the Unix epoch.
    pub timestamp: i64,
}

impl CommitNode {
    /// `true` when this commit joins two or more branches.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

// ---------------------------------------------------------------------------
// TreeChange
// ---------------------------------------------------------------------------

/// The kind of change between a commit tree and its parent tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    /// A file appeared.
    Insert,
    /// A file disappeared.
    Delete,
    /// A file's content changed. A rename is a `Modify` whose `from_path`
    /// differs from `to_path`.
    Modify,
}

/// A single file-level change between two commit trees.
///
/// For `Insert` only the `to_*` side is meaningful (`from_blob` is
/// [`Oid::ZERO`]); for `Delete` only the `from_*` side. `Modify` carries both
/// sides, and a rename additionally differs in paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeChange {
    /// What happened.
    pub action: ChangeAction,
    /// Path in the parent tree.
    pub from_path: String,
    /// Path in the commit's own tree.
    pub to_path: String,
    /// Blob OID in the parent tree, zero for insertions.
    pub from_blob: Oid,
    /// Blob OID in the commit's tree, zero for deletions.
    pub to_blob: Oid,
}

impl TreeChange {
    /// A new file at `path` with content `blob`.
    #[must_use]
    pub fn insert(path: impl Into<String>, blob: Oid) -> Self {
        let path = path.into();
        Self {
            action: ChangeAction::Insert,
            from_path: path.clone(),
            to_path: path,
            from_blob: Oid::ZERO,
            to_blob: blob,
        }
    }

    /// The file at `path` (content `blob`) disappeared.
    #[must_use]
    pub fn delete(path: impl Into<String>, blob: Oid) -> Self {
        let path = path.into();
        Self {
            action: ChangeAction::Delete,
            from_path: path.clone(),
            to_path: path,
            from_blob: blob,
            to_blob: Oid::ZERO,
        }
    }

    /// Content change `from_blob` → `to_blob`, possibly under a new path.
    #[must_use]
    pub fn modify(
        from_path: impl Into<String>,
        to_path: impl Into<String>,
        from_blob: Oid,
        to_blob: Oid,
    ) -> Self {
        Self {
            action: ChangeAction::Modify,
            from_path: from_path.into(),
            to_path: to_path.into(),
            from_blob,
            to_blob,
        }
    }

    /// `true` when this change moves the file to a different path.
    #[must_use]
    pub fn is_rename(&self) -> bool {
        self.from_path != self.to_path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Oid --

    #[test]
    fn oid_roundtrip_hex() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let oid: Oid = hex.parse().unwrap();
        assert_eq!(oid.to_string(), hex);
    }

    #[test]
    fn oid_zero() {
        assert!(Oid::ZERO.is_zero());
        assert_eq!(
            Oid::ZERO.to_string(),
            "0000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn oid_rejects_short() {
        assert!("abc".parse::<Oid>().is_err());
    }

    #[test]
    fn oid_rejects_non_hex() {
        let bad = "g".repeat(40);
        assert!(bad.parse::<Oid>().is_err());
    }

    #[test]
    fn oid_from_bytes() {
        let bytes = [0xab; 20];
        let oid = Oid::from_bytes(bytes);
        assert_eq!(oid.as_bytes(), &bytes);
        assert_eq!(oid.to_string(), "ab".repeat(20));
    }

    // -- CommitNode --

    #[test]
    fn merge_detection() {
        let a = Oid::from_bytes([1; 20]);
        let b = Oid::from_bytes([2; 20]);
        let mut node = CommitNode {
            id: Oid::from_bytes([3; 20]),
            parents: vec![a],
            author_name: "Alice".to_owned(),
            author_email: "alice@example.com".to_owned(),
            timestamp: 0,
        };
        assert!(!node.is_merge());
        node.parents.push(b);
        assert!(node.is_merge());
    }

    // -- TreeChange --

    #[test]
    fn change_constructors() {
        let blob = Oid::from_bytes([7; 20]);
        let ins = TreeChange::insert("a.rs", blob);
        assert_eq!(ins.action, ChangeAction::Insert);
        assert_eq!(ins.from_blob, Oid::ZERO);
        assert!(!ins.is_rename());

        let del = TreeChange::delete("a.rs", blob);
        assert_eq!(del.action, ChangeAction::Delete);
        assert_eq!(del.to_blob, Oid::ZERO);

        let ren = TreeChange::modify("a.rs", "b.rs", blob, blob);
        assert!(ren.is_rename());
    }
}
