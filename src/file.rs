//! The per-file line engine: one tracked file, its ownership tree, and the
//! folding of line diffs into tree updates.
//!
//! A [`File`] pairs a [`LineTree`] with the blob OID of its current content.
//! The OID is the merge fast-path: when sibling replicas carry the same hash
//! their trees are guaranteed identical and the join does no work.

use strata_git::Oid;

use crate::arena::NodeArena;
use crate::status::Status;
use crate::tree::{DeltaSink, LineTree, TreeError};

// ---------------------------------------------------------------------------
// FileDiffData
// ---------------------------------------------------------------------------

/// One hunk operation of a line-level blob diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffOp {
    /// Lines present on both sides.
    Equal,
    /// Lines only in the new blob.
    Insert,
    /// Lines only in the old blob.
    Delete,
}

/// A line-level diff between two blobs of the same file.
///
/// Only line counts are carried — the engine never needs edit content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDiffData {
    /// Line count of the old blob.
    pub old_loc: u32,
    /// Line count of the new blob.
    pub new_loc: u32,
    /// Hunk operations in file order.
    pub diffs: Vec<(DiffOp, u32)>,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A tracked file: its content hash and its line-ownership tree.
#[derive(Debug)]
pub struct File {
    hash: Oid,
    tree: LineTree,
}

impl File {
    /// Track a freshly inserted file of `length` lines authored as `status`.
    pub fn new(
        arena: &mut NodeArena,
        hash: Oid,
        status: Status,
        length: u32,
        sink: &mut dyn DeltaSink,
    ) -> Self {
        Self {
            hash,
            tree: LineTree::build(arena, status, length, sink),
        }
    }

    /// The blob OID of the current content.
    #[must_use]
    pub const fn hash(&self) -> Oid {
        self.hash
    }

    /// Replace the content hash (after a modification).
    pub const fn set_hash(&mut self, hash: Oid) {
        self.hash = hash;
    }

    /// Current line count.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.tree.len()
    }

    /// `true` when no lines are tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Direct access to the ownership tree.
    #[must_use]
    pub const fn tree(&self) -> &LineTree {
        &self.tree
    }

    /// Apply a raw edit; see [`LineTree::update`].
    ///
    /// # Errors
    ///
    /// Propagates [`TreeError`] on out-of-range edits.
    pub fn update(
        &mut self,
        arena: &mut NodeArena,
        status: Status,
        pos: u32,
        ins: u32,
        del: u32,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), TreeError> {
        self.tree.update(arena, status, pos, ins, del, sink)
    }

    /// Replay a whole line diff against this file.
    ///
    /// Contiguous Delete+Insert pairs fold into a single tree update; lone
    /// ops map directly; Equal only advances the cursor. The file length is
    /// checked against `old_loc` before and `new_loc` after — a mismatch
    /// means the tree diff and the file diff disagree about this commit.
    ///
    /// # Errors
    ///
    /// [`TreeError::LengthMismatch`] on either length check, or any error
    /// from the underlying updates.
    pub fn apply_diff(
        &mut self,
        arena: &mut NodeArena,
        status: Status,
        diff: &FileDiffData,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), TreeError> {
        if self.len() != diff.old_loc {
            return Err(TreeError::LengthMismatch {
                expected: diff.old_loc,
                actual: self.len(),
            });
        }

        let mut position: u32 = 0;
        let mut pending_delete: u32 = 0;
        for &(op, count) in &diff.diffs {
            match op {
                DiffOp::Delete => {
                    // Folded into the next op; a second pending delete would
                    // mean a malformed diff, treat it as contiguous.
                    pending_delete += count;
                }
                DiffOp::Insert => {
                    self.tree
                        .update(arena, status, position, count, pending_delete, sink)?;
                    pending_delete = 0;
                    position += count;
                }
                DiffOp::Equal => {
                    if pending_delete > 0 {
                        self.tree
                            .update(arena, status, position, 0, pending_delete, sink)?;
                        pending_delete = 0;
                    }
                    position += count;
                }
            }
        }
        if pending_delete > 0 {
            self.tree
                .update(arena, status, position, 0, pending_delete, sink)?;
        }

        if self.len() != diff.new_loc {
            return Err(TreeError::LengthMismatch {
                expected: diff.new_loc,
                actual: self.len(),
            });
        }
        Ok(())
    }

    /// Book the removal of every line (the file was deleted).
    ///
    /// # Errors
    ///
    /// Propagates [`TreeError`] when `expected_lines` disagrees with the
    /// tracked length.
    pub fn delete_all(
        &mut self,
        arena: &mut NodeArena,
        status: Status,
        expected_lines: u32,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), TreeError> {
        if self.len() != expected_lines {
            return Err(TreeError::LengthMismatch {
                expected: expected_lines,
                actual: self.len(),
            });
        }
        self.tree.update(arena, status, 0, 0, expected_lines, sink)
    }

    /// Merge sibling replicas of this file. The fast path — every sibling
    /// carries the same content hash and our attribution holds no transient
    /// merge marks — does no work at all. (Replaying the merge commit leaves
    /// every replica at the merge blob, so equal hashes alone cannot prove
    /// equal attribution.)
    ///
    /// # Errors
    ///
    /// Propagates [`TreeError::LengthMismatch`] when replica lengths differ.
    pub fn merge(
        &mut self,
        arena: &mut NodeArena,
        merge_tick: u32,
        others: &[(Oid, Vec<Status>)],
        sink: &mut dyn DeltaSink,
    ) -> Result<bool, TreeError> {
        if others.iter().all(|(hash, _)| *hash == self.hash)
            && !self.tree.has_merge_marks(arena)
        {
            return Ok(false);
        }
        let lines: Vec<Vec<Status>> = others.iter().map(|(_, l)| l.clone()).collect();
        self.tree.merge(arena, merge_tick, &lines, sink)
    }

    /// Duplicate into another replica's arena; identifier preserved.
    #[must_use]
    pub fn clone_into(&self, src: &NodeArena, dst: &mut NodeArena) -> Self {
        Self {
            hash: self.hash,
            tree: self.tree.clone_into(src, dst),
        }
    }

    /// Free the tree's nodes; the file is dropped afterwards.
    pub fn dispose(&mut self, arena: &mut NodeArena) {
        self.tree.dispose(arena);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NullSink, RecordingSink};

    fn s(author: u32, tick: u32) -> Status {
        Status::new(author, tick)
    }

    fn oid(b: u8) -> Oid {
        Oid::from_bytes([b; 20])
    }

    // -- apply_diff --

    #[test]
    fn diff_replaces_folded_pair() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 10, &mut NullSink);
        let diff = FileDiffData {
            old_loc: 10,
            new_loc: 9,
            diffs: vec![
                (DiffOp::Equal, 3),
                (DiffOp::Delete, 4),
                (DiffOp::Insert, 3),
                (DiffOp::Equal, 3),
            ],
        };
        let mut sink = RecordingSink::default();
        file.apply_diff(&mut arena, s(1, 5), &diff, &mut sink).unwrap();
        assert_eq!(file.len(), 9);
        assert_eq!(
            sink.events,
            vec![(s(1, 5), s(1, 5), 3), (s(1, 5), s(0, 0), -4)]
        );
        assert_eq!(
            file.tree().runs(&arena),
            vec![(0, s(0, 0)), (3, s(1, 5)), (6, s(0, 0))]
        );
    }

    #[test]
    fn diff_lone_insert_and_trailing_delete() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 6, &mut NullSink);
        let diff = FileDiffData {
            old_loc: 6,
            new_loc: 6,
            diffs: vec![
                (DiffOp::Insert, 2),
                (DiffOp::Equal, 4),
                (DiffOp::Delete, 2),
            ],
        };
        file.apply_diff(&mut arena, s(1, 5), &diff, &mut NullSink)
            .unwrap();
        assert_eq!(file.len(), 6);
        assert_eq!(
            file.tree().runs(&arena),
            vec![(0, s(1, 5)), (2, s(0, 0))]
        );
    }

    #[test]
    fn diff_old_loc_mismatch_is_error() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 5, &mut NullSink);
        let diff = FileDiffData {
            old_loc: 6,
            new_loc: 6,
            diffs: vec![(DiffOp::Equal, 6)],
        };
        let err = file
            .apply_diff(&mut arena, s(1, 1), &diff, &mut NullSink)
            .unwrap_err();
        assert!(matches!(err, TreeError::LengthMismatch { expected: 6, actual: 5 }));
    }

    #[test]
    fn diff_new_loc_mismatch_is_error() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 5, &mut NullSink);
        let diff = FileDiffData {
            old_loc: 5,
            new_loc: 9,
            diffs: vec![(DiffOp::Equal, 5)],
        };
        let err = file
            .apply_diff(&mut arena, s(1, 1), &diff, &mut NullSink)
            .unwrap_err();
        assert!(matches!(err, TreeError::LengthMismatch { expected: 9, actual: 5 }));
    }

    // -- delete_all --

    #[test]
    fn delete_all_books_removals() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 12, &mut NullSink);
        let mut sink = RecordingSink::default();
        file.delete_all(&mut arena, s(1, 30), 12, &mut sink).unwrap();
        assert_eq!(file.len(), 0);
        assert_eq!(sink.events, vec![(s(1, 30), s(0, 0), -12)]);
    }

    #[test]
    fn delete_all_length_mismatch_is_error() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 12, &mut NullSink);
        let err = file
            .delete_all(&mut arena, s(1, 30), 10, &mut NullSink)
            .unwrap_err();
        assert!(matches!(err, TreeError::LengthMismatch { .. }));
    }

    // -- merge --

    #[test]
    fn merge_fast_path_on_equal_hashes() {
        let mut arena = NodeArena::new();
        let mut file = File::new(&mut arena, oid(1), s(0, 0), 5, &mut NullSink);
        // Sibling claims different lines but the identical hash proves they
        // cannot actually differ — no work.
        let others = vec![(oid(1), vec![s(9, 9); 5])];
        let changed = file
            .merge(&mut arena, 20, &others, &mut NullSink)
            .unwrap();
        assert!(!changed);
        assert_eq!(file.tree().runs(&arena), vec![(0, s(0, 0))]);
    }

    #[test]
    fn merge_differing_hash_reconciles() {
        let mut arena = NodeArena::new();
        let mut file = File::new(
            &mut arena,
            oid(1),
            s(2, crate::status::MERGE_MARK),
            5,
            &mut NullSink,
        );
        let others = vec![(oid(2), vec![s(1, 12); 5])];
        let changed = file
            .merge(&mut arena, 20, &others, &mut NullSink)
            .unwrap();
        assert!(changed);
        assert_eq!(file.tree().runs(&arena), vec![(0, s(1, 12))]);
    }

    // -- clone --

    #[test]
    fn clone_preserves_hash_and_tree() {
        let mut arena = NodeArena::new();
        let file = File::new(&mut arena, oid(7), s(0, 0), 5, &mut NullSink);
        let mut dst = NodeArena::new();
        let copy = file.clone_into(&arena, &mut dst);
        assert_eq!(copy.hash(), oid(7));
        assert_eq!(copy.len(), 5);
        assert_eq!(copy.tree().runs(&dst), file.tree().runs(&arena));
    }
}
