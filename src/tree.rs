//! The line-ownership tree: a sorted run-length map from line index to
//! [`Status`].
//!
//! A tree models the function `status(line) = value of the greatest node
//! with key ≤ line`, so the interval `[key, next_key)` carries one status and
//! the node list is a run-length encoding of the file. Two invariants hold at
//! all times:
//!
//! - keys are strictly ascending, ending in the tail node
//!   `(length, TREE_END)`;
//! - no two adjacent nodes carry equal values (runs are always coalesced).
//!
//! Every structural change reports its `(current, previous, delta)`
//! transitions to a [`DeltaSink`] — that stream is what the burndown
//! histories aggregate. Since an edit shifts the key of every subsequent
//! run, updates are inherently linear in the number of runs; the node list
//! lives in a [`NodeArena`] so forks can copy it wholesale and hibernation
//! can snapshot it.

use std::fmt;

use crate::arena::{NIL, Node, NodeArena};
use crate::status::{Status, TREE_END};

// ---------------------------------------------------------------------------
// DeltaSink
// ---------------------------------------------------------------------------

/// Receiver of line-status transitions.
///
/// `current` is the status being written by the commit under replay,
/// `previous` the status the affected lines carried before (equal to
/// `current` for insertions), `delta` the signed number of lines.
pub trait DeltaSink {
    /// Record one transition.
    fn record(&mut self, current: Status, previous: Status, delta: i64);
}

/// A sink that discards transitions. Used when cloning or rebuilding trees
/// whose lines are already accounted for.
pub struct NullSink;

impl DeltaSink for NullSink {
    fn record(&mut self, _: Status, _: Status, _: i64) {}
}

/// A sink that keeps every transition. Test helper.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// All `(current, previous, delta)` transitions, in order.
    pub events: Vec<(Status, Status, i64)>,
}

impl DeltaSink for RecordingSink {
    fn record(&mut self, current: Status, previous: Status, delta: i64) {
        self.events.push((current, previous, delta));
    }
}

// ---------------------------------------------------------------------------
// TreeError
// ---------------------------------------------------------------------------

/// Integrity failures inside a tree operation. These always mean the facts
/// fed to the engine (tree diff vs file diff) disagree about the same file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeError {
    /// An edit position beyond the end of the file.
    PositionOutOfRange {
        /// The requested position.
        position: u32,
        /// The tree length.
        length: u32,
    },
    /// A removal extending past the tail.
    RemovalPastEnd {
        /// The requested position.
        position: u32,
        /// The requested removal length.
        removed: u32,
        /// The tree length.
        length: u32,
    },
    /// The tree length disagrees with what the operation expected.
    LengthMismatch {
        /// Expected length.
        expected: u32,
        /// Observed length.
        actual: u32,
    },
    /// Structural validation failed (ordering, links, coalescing).
    Corrupt {
        /// What was wrong.
        detail: String,
    },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PositionOutOfRange { position, length } => {
                write!(f, "position {position} beyond tree length {length}")
            }
            Self::RemovalPastEnd {
                position,
                removed,
                length,
            } => write!(
                f,
                "removing {removed} lines at {position} overruns tree length {length}"
            ),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "tree length {actual} != expected {expected}")
            }
            Self::Corrupt { detail } => write!(f, "corrupt tree: {detail}"),
        }
    }
}

impl std::error::Error for TreeError {}

// ---------------------------------------------------------------------------
// LineTree
// ---------------------------------------------------------------------------

/// A run-length line-status map over arena nodes.
///
/// Holds only node indices; the arena is passed into every operation so one
/// arena can back many trees.
#[derive(Debug)]
pub struct LineTree {
    first: u32,
    tail: u32,
    len: u32,
}

impl LineTree {
    /// Build a tree of `length` lines all carrying `status` and report the
    /// insertion to `sink`. A zero-length tree is just a tail node.
    pub fn build(
        arena: &mut NodeArena,
        status: Status,
        length: u32,
        sink: &mut dyn DeltaSink,
    ) -> Self {
        let tail = arena.alloc(Node::detached(length, TREE_END));
        if length == 0 {
            return Self {
                first: tail,
                tail,
                len: 0,
            };
        }
        let first = arena.alloc(Node::detached(0, status.raw()));
        arena.node_mut(first).next = tail;
        arena.node_mut(tail).prev = first;
        sink.record(status, status, i64::from(length));
        Self {
            first,
            tail,
            len: length,
        }
    }

    /// Rebuild a tree from one status per line, coalescing equal neighbors.
    /// Emits nothing — the caller owns the accounting.
    pub fn build_from_lines(arena: &mut NodeArena, lines: &[Status]) -> Self {
        let len = u32::try_from(lines.len()).expect("file exceeds u32 lines");
        let tail = arena.alloc(Node::detached(len, TREE_END));
        let mut tree = Self {
            first: tail,
            tail,
            len,
        };
        let mut pred = NIL;
        let mut i = 0;
        while i < lines.len() {
            let start = i;
            while i < lines.len() && lines[i] == lines[start] {
                i += 1;
            }
            let node = arena.alloc(Node::detached(
                u32::try_from(start).expect("file exceeds u32 lines"),
                lines[start].raw(),
            ));
            tree.link_after(arena, pred, node);
            pred = node;
        }
        tree
    }

    /// The number of lines: the tail key.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// `true` when no lines are tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The status covering `line`. `line` must be within the tree.
    #[must_use]
    pub fn value_at(&self, arena: &NodeArena, line: u32) -> Status {
        Status::from_raw(arena.node(self.find_le(arena, line)).value)
    }

    /// `true` when any run still carries the transient merge mark.
    #[must_use]
    pub fn has_merge_marks(&self, arena: &NodeArena) -> bool {
        let mut cur = self.first;
        while cur != self.tail {
            let node = arena.node(cur);
            if Status::from_raw(node.value).is_merge_marked() {
                return true;
            }
            cur = node.next;
        }
        false
    }

    /// All `(start_line, status)` runs, tail excluded.
    #[must_use]
    pub fn runs(&self, arena: &NodeArena) -> Vec<(u32, Status)> {
        let mut out = Vec::new();
        let mut cur = self.first;
        while cur != self.tail {
            let node = arena.node(cur);
            out.push((node.key, Status::from_raw(node.value)));
            cur = node.next;
        }
        out
    }

    /// One status per line.
    #[must_use]
    pub fn flatten(&self, arena: &NodeArena) -> Vec<Status> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut cur = self.first;
        while cur != self.tail {
            let node = arena.node(cur);
            let until = arena.node(node.next).key;
            for _ in node.key..until {
                out.push(Status::from_raw(node.value));
            }
            cur = node.next;
        }
        out
    }

    /// At `pos`, insert `ins` lines carrying `status`, then remove the next
    /// `del` old lines. Reports every transition to `sink`, maintains the
    /// coalescing invariant, and verifies the resulting length.
    ///
    /// # Errors
    ///
    /// [`TreeError`] when the edit falls outside the tree or the structure
    /// ends up inconsistent — both signal upstream diff misalignment.
    pub fn update(
        &mut self,
        arena: &mut NodeArena,
        status: Status,
        pos: u32,
        ins: u32,
        del: u32,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), TreeError> {
        if ins == 0 && del == 0 {
            return Ok(());
        }
        let old_len = self.len;
        if pos > old_len {
            return Err(TreeError::PositionOutOfRange {
                position: pos,
                length: old_len,
            });
        }
        if del > old_len - pos {
            return Err(TreeError::RemovalPastEnd {
                position: pos,
                removed: del,
                length: old_len,
            });
        }
        let end = pos + del;

        if ins > 0 {
            sink.record(status, status, i64::from(ins));
        }

        // Report the runs consumed by the removal before touching structure.
        if del > 0 {
            let mut n = self.find_le(arena, pos);
            let mut cursor = pos;
            while cursor < end {
                let run_end = arena.node(arena.node(n).next).key;
                let take = run_end.min(end) - cursor;
                sink.record(
                    status,
                    Status::from_raw(arena.node(n).value),
                    -i64::from(take),
                );
                cursor += take;
                n = arena.node(n).next;
            }
        }

        // Status of the first surviving old line, if any.
        let right_val = if end < old_len {
            Some(self.value_at(arena, end))
        } else {
            None
        };

        // Drop every run boundary inside [pos, end); the boundary exactly at
        // `end` survives and starts the shifted remainder.
        let left = self.find_le(arena, pos);
        let (pred, mut cur) = if arena.node(left).key == pos {
            (arena.node(left).prev, left)
        } else {
            (left, arena.node(left).next)
        };
        while cur != NIL && arena.node(cur).key < end {
            let next = arena.node(cur).next;
            self.unlink_free(arena, cur);
            cur = next;
        }

        // Shift the remainder, tail included.
        let mut m = cur;
        while m != NIL {
            let node = arena.node_mut(m);
            node.key = node.key - del + ins;
            m = node.next;
        }

        // Stitch the seam: the inserted run, then the survivor's boundary
        // when the removal cut one mid-run.
        let mut seam_pred = pred;
        let mut inserted = NIL;
        if ins > 0 {
            inserted = arena.alloc(Node::detached(pos, status.raw()));
            self.link_after(arena, seam_pred, inserted);
            seam_pred = inserted;
        }
        let mut resumed = NIL;
        if let Some(rv) = right_val {
            if arena.node(cur).key != pos + ins {
                resumed = arena.alloc(Node::detached(pos + ins, rv.raw()));
                self.link_after(arena, seam_pred, resumed);
            }
        }

        self.coalesce_at(arena, inserted);
        self.coalesce_at(arena, resumed);
        self.coalesce_at(arena, cur);

        self.len = old_len - del + ins;
        let tail_key = arena.node(self.tail).key;
        if tail_key != self.len {
            return Err(TreeError::LengthMismatch {
                expected: self.len,
                actual: tail_key,
            });
        }
        Ok(())
    }

    /// Merge sibling replicas of the same file into `self`.
    ///
    /// `others` are the siblings' lines (already flattened with their own
    /// arenas); all replicas must agree on length. Per line the winner is the
    /// most concrete status: merge-marked loses to unmarked, missing-author
    /// loses to known, then the greater tick and finally the lower author
    /// index win. Ranges still merge-marked on every replica are lines the
    /// merge commit itself authored: they resolve to `merge_tick` and are the
    /// only ranges booked through `sink` (everything else was already
    /// accounted on the branch that really wrote it).
    ///
    /// Returns `true` when `self` changed.
    ///
    /// # Errors
    ///
    /// [`TreeError::LengthMismatch`] when a replica disagrees on length.
    pub fn merge(
        &mut self,
        arena: &mut NodeArena,
        merge_tick: u32,
        others: &[Vec<Status>],
        sink: &mut dyn DeltaSink,
    ) -> Result<bool, TreeError> {
        let original = self.flatten(arena);
        let mut lines = original.clone();
        for other in others {
            if other.len() != lines.len() {
                return Err(TreeError::LengthMismatch {
                    expected: u32::try_from(lines.len()).expect("file exceeds u32 lines"),
                    actual: u32::try_from(other.len()).expect("file exceeds u32 lines"),
                });
            }
            for (mine, &theirs) in lines.iter_mut().zip(other) {
                *mine = pick_winner(*mine, theirs);
            }
        }

        // Resolve leftover merge marks, one emission per run.
        let mut i = 0;
        while i < lines.len() {
            if lines[i].is_merge_marked() {
                let marked = lines[i];
                let mut j = i;
                while j < lines.len() && lines[j] == marked {
                    j += 1;
                }
                let resolved = marked.with_tick(merge_tick);
                for line in &mut lines[i..j] {
                    *line = resolved;
                }
                sink.record(resolved, resolved, i64::try_from(j - i).expect("run fits i64"));
                i = j;
            } else {
                i += 1;
            }
        }

        if lines == original {
            return Ok(false);
        }
        self.dispose(arena);
        *self = Self::build_from_lines(arena, &lines);
        Ok(true)
    }

    /// Duplicate this tree's nodes into `dst` (a different replica's arena).
    #[must_use]
    pub fn clone_into(&self, src: &NodeArena, dst: &mut NodeArena) -> Self {
        let mut tree = Self {
            first: NIL,
            tail: NIL,
            len: self.len,
        };
        let mut pred = NIL;
        let mut cur = self.first;
        while cur != NIL {
            let node = *src.node(cur);
            let idx = dst.alloc(Node::detached(node.key, node.value));
            if pred == NIL {
                tree.first = idx;
            } else {
                dst.node_mut(pred).next = idx;
                dst.node_mut(idx).prev = pred;
            }
            pred = idx;
            cur = node.next;
        }
        tree.tail = pred;
        tree
    }

    /// Duplicate this tree's nodes within the same arena.
    #[must_use]
    pub fn clone_within(&self, arena: &mut NodeArena) -> Self {
        let mut snapshot = Vec::new();
        let mut cur = self.first;
        while cur != NIL {
            let node = arena.node(cur);
            snapshot.push((node.key, node.value));
            cur = node.next;
        }

        let mut tree = Self {
            first: NIL,
            tail: NIL,
            len: self.len,
        };
        let mut pred = NIL;
        for (key, value) in snapshot {
            let idx = arena.alloc(Node::detached(key, value));
            if pred == NIL {
                tree.first = idx;
            } else {
                arena.node_mut(pred).next = idx;
                arena.node_mut(idx).prev = pred;
            }
            pred = idx;
        }
        tree.tail = pred;
        tree
    }

    /// Free every node back to the arena. The tree is unusable afterwards.
    pub fn dispose(&mut self, arena: &mut NodeArena) {
        let mut cur = self.first;
        while cur != NIL {
            let next = arena.node(cur).next;
            arena.free(cur);
            cur = next;
        }
        self.first = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    /// Check every structural invariant: link symmetry, strictly ascending
    /// keys, first key 0, tail key == length, no adjacent duplicate runs.
    ///
    /// # Errors
    ///
    /// [`TreeError`] naming the violated invariant.
    pub fn validate(&self, arena: &NodeArena) -> Result<(), TreeError> {
        let mut cur = self.first;
        let mut prev = NIL;
        let mut last_key: Option<u32> = None;
        let mut last_run_value: Option<u32> = None;
        while cur != NIL {
            let node = arena.node(cur);
            if node.prev != prev {
                return Err(TreeError::Corrupt {
                    detail: format!("node {cur} has prev {} instead of {prev}", node.prev),
                });
            }
            if let Some(k) = last_key {
                if node.key <= k {
                    return Err(TreeError::Corrupt {
                        detail: format!("key {} after key {k} is not ascending", node.key),
                    });
                }
            }
            if cur != self.tail {
                if last_run_value == Some(node.value) {
                    return Err(TreeError::Corrupt {
                        detail: format!("adjacent runs share value {:#x}", node.value),
                    });
                }
                last_run_value = Some(node.value);
            }
            last_key = Some(node.key);
            prev = cur;
            cur = node.next;
        }
        if prev != self.tail {
            return Err(TreeError::Corrupt {
                detail: "list does not end at the tail node".to_owned(),
            });
        }
        let tail_key = arena.node(self.tail).key;
        if tail_key != self.len {
            return Err(TreeError::LengthMismatch {
                expected: self.len,
                actual: tail_key,
            });
        }
        if self.len > 0 && arena.node(self.first).key != 0 {
            return Err(TreeError::Corrupt {
                detail: "first run does not start at line 0".to_owned(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // internals
    // -----------------------------------------------------------------------

    /// The last node with `key <= pos`. The first node qualifies for any
    /// in-range `pos`, so this always lands somewhere.
    fn find_le(&self, arena: &NodeArena, pos: u32) -> u32 {
        let mut cur = self.first;
        loop {
            let next = arena.node(cur).next;
            if next == NIL || arena.node(next).key > pos {
                return cur;
            }
            cur = next;
        }
    }

    fn link_after(&mut self, arena: &mut NodeArena, pred: u32, idx: u32) {
        if pred == NIL {
            let old_first = self.first;
            arena.node_mut(idx).prev = NIL;
            arena.node_mut(idx).next = old_first;
            if old_first != NIL {
                arena.node_mut(old_first).prev = idx;
            }
            self.first = idx;
        } else {
            let next = arena.node(pred).next;
            arena.node_mut(idx).prev = pred;
            arena.node_mut(idx).next = next;
            arena.node_mut(pred).next = idx;
            if next != NIL {
                arena.node_mut(next).prev = idx;
            }
        }
    }

    fn unlink_free(&mut self, arena: &mut NodeArena, idx: u32) {
        let Node { prev, next, .. } = *arena.node(idx);
        if prev == NIL {
            self.first = next;
        } else {
            arena.node_mut(prev).next = next;
        }
        if next != NIL {
            arena.node_mut(next).prev = prev;
        }
        arena.free(idx);
    }

    /// Drop `idx` when it duplicates its predecessor's value. The tail and
    /// the first node never coalesce away.
    fn coalesce_at(&mut self, arena: &mut NodeArena, idx: u32) {
        if idx == NIL || idx == self.tail {
            return;
        }
        let prev = arena.node(idx).prev;
        if prev == NIL {
            return;
        }
        if arena.node(prev).value == arena.node(idx).value {
            self.unlink_free(arena, idx);
        }
    }
}

/// The more concrete of two statuses for the same line on two sibling
/// replicas.
fn pick_winner(a: Status, b: Status) -> Status {
    if a == b {
        return a;
    }
    match (a.is_merge_marked(), b.is_merge_marked()) {
        (true, false) => b,
        (false, true) => a,
        _ => match (a.is_author_missing(), b.is_author_missing()) {
            (true, false) => b,
            (false, true) => a,
            _ => {
                if a.tick() != b.tick() {
                    if a.tick() > b.tick() { a } else { b }
                } else if a.author() <= b.author() {
                    a
                } else {
                    b
                }
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
