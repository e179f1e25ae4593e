//! Per-commit line totals: added, removed, changed.
//!
//! Derived from the tree changes and the line diffs: whole-file inserts and
//! deletes count wholesale, modifications pair deleted runs with the
//! insertions that immediately replace them — the paired portion counts as
//! "changed" rather than an add plus a remove.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strata_git::ChangeAction;

use crate::error::Result;
use crate::file::{DiffOp, FileDiffData};
use crate::pipeline::{
    DEPENDENCY_BLOB_CACHE, DEPENDENCY_FILE_DIFF, DEPENDENCY_LINE_STATS,
    DEPENDENCY_TREE_CHANGES, Deps, Fact, PipelineItem,
};

// ---------------------------------------------------------------------------
// LineStats
// ---------------------------------------------------------------------------

/// Signed line totals for one commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStats {
    /// Lines added (not part of a replacement pair).
    pub added: i64,
    /// Lines removed (not part of a replacement pair).
    pub removed: i64,
    /// Lines replaced in place.
    pub changed: i64,
}

impl LineStats {
    /// Element-wise sum.
    #[must_use]
    pub const fn plus(self, other: Self) -> Self {
        Self {
            added: self.added + other.added,
            removed: self.removed + other.removed,
            changed: self.changed + other.changed,
        }
    }
}

/// Totals for a single file diff: contiguous Delete+Insert pairs overlap
/// into `changed`, the remainders stay added/removed.
#[must_use]
pub fn diff_line_stats(diff: &FileDiffData) -> LineStats {
    let mut stats = LineStats::default();
    let mut pending_delete: i64 = 0;
    for &(op, count) in &diff.diffs {
        let count = i64::from(count);
        match op {
            DiffOp::Delete => pending_delete += count,
            DiffOp::Insert => {
                let paired = pending_delete.min(count);
                stats.changed += paired;
                stats.added += count - paired;
                stats.removed += pending_delete - paired;
                pending_delete = 0;
            }
            DiffOp::Equal => {
                stats.removed += pending_delete;
                pending_delete = 0;
            }
        }
    }
    stats.removed += pending_delete;
    stats
}

// ---------------------------------------------------------------------------
// LineStatsItem
// ---------------------------------------------------------------------------

/// Provides [`DEPENDENCY_LINE_STATS`].
#[derive(Clone, Debug, Default)]
pub struct LineStatsItem;

impl PipelineItem for LineStatsItem {
    fn name(&self) -> &'static str {
        "line_stats"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_LINE_STATS]
    }

    fn requires(&self) -> &'static [&'static str] {
        &[
            DEPENDENCY_TREE_CHANGES,
            DEPENDENCY_BLOB_CACHE,
            DEPENDENCY_FILE_DIFF,
        ]
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let changes = Rc::clone(deps.tree_changes()?);
        let blobs = Rc::clone(deps.blob_cache()?);
        let diffs = Rc::clone(deps.file_diffs()?);

        let mut total = LineStats::default();
        for change in changes.iter() {
            match change.action {
                ChangeAction::Insert => {
                    if let Some(lines) = blobs.get(&change.to_blob).and_then(|b| b.lines) {
                        total.added += i64::from(lines);
                    }
                }
                ChangeAction::Delete => {
                    if let Some(lines) = blobs.get(&change.from_blob).and_then(|b| b.lines) {
                        total.removed += i64::from(lines);
                    }
                }
                ChangeAction::Modify => {
                    if let Some(diff) = diffs.get(&change.to_path) {
                        total = total.plus(diff_line_stats(diff));
                    }
                }
            }
        }
        deps.insert(DEPENDENCY_LINE_STATS, Fact::LineStats(total));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n).map(|_| Box::new(Self) as Box<dyn PipelineItem>).collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
