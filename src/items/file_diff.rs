//! The file-diff feeder: line-level diffs for every modified text file.
//!
//! Diffs are computed over lines with `similar`; only opcode run lengths
//! survive into [`FileDiffData`] — the burndown engine never looks at edit
//! content. Changes with a binary blob on either side produce no entry,
//! matching the engine's silent-skip policy.

use std::collections::BTreeMap;
use std::rc::Rc;

use similar::{DiffOp as SimilarOp, TextDiff};

use crate::error::Result;
use crate::file::{DiffOp, FileDiffData};
use crate::items::blob_cache::CachedBlob;
use crate::pipeline::{
    DEPENDENCY_BLOB_CACHE, DEPENDENCY_FILE_DIFF, DEPENDENCY_TREE_CHANGES, Deps, Fact,
    PipelineItem,
};
use strata_git::ChangeAction;

/// Provides [`DEPENDENCY_FILE_DIFF`]: `path → FileDiffData` for modified
/// files whose both sides are text.
#[derive(Clone, Debug, Default)]
pub struct FileDiffItem;

/// Diff two text blobs into opcode run lengths.
#[must_use]
pub fn diff_blobs(old: &[u8], new: &[u8], old_loc: u32, new_loc: u32) -> FileDiffData {
    let diff = TextDiff::from_lines(old, new);
    let mut diffs = Vec::new();
    for op in diff.ops() {
        match *op {
            SimilarOp::Equal { len, .. } => {
                diffs.push((DiffOp::Equal, u32::try_from(len).expect("hunk fits u32")));
            }
            SimilarOp::Delete { old_len, .. } => {
                diffs.push((DiffOp::Delete, u32::try_from(old_len).expect("hunk fits u32")));
            }
            SimilarOp::Insert { new_len, .. } => {
                diffs.push((DiffOp::Insert, u32::try_from(new_len).expect("hunk fits u32")));
            }
            SimilarOp::Replace {
                old_len, new_len, ..
            } => {
                diffs.push((DiffOp::Delete, u32::try_from(old_len).expect("hunk fits u32")));
                diffs.push((DiffOp::Insert, u32::try_from(new_len).expect("hunk fits u32")));
            }
        }
    }
    FileDiffData {
        old_loc,
        new_loc,
        diffs,
    }
}

impl PipelineItem for FileDiffItem {
    fn name(&self) -> &'static str {
        "file_diff"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_FILE_DIFF]
    }

    fn requires(&self) -> &'static [&'static str] {
        &[DEPENDENCY_TREE_CHANGES, DEPENDENCY_BLOB_CACHE]
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let changes = Rc::clone(deps.tree_changes()?);
        let blobs = Rc::clone(deps.blob_cache()?);

        let mut result: BTreeMap<String, FileDiffData> = BTreeMap::new();
        for change in changes.iter() {
            if change.action != ChangeAction::Modify {
                continue;
            }
            let (Some(old), Some(new)) = (
                blobs.get(&change.from_blob),
                blobs.get(&change.to_blob),
            ) else {
                continue;
            };
            let (old, new): (&CachedBlob, &CachedBlob) = (old, new);
            let (Some(old_loc), Some(new_loc)) = (old.lines, new.lines) else {
                continue; // binary on either side
            };
            result.insert(
                change.to_path.clone(),
                diff_blobs(&old.data, &new.data, old_loc, new_loc),
            );
        }
        deps.insert(DEPENDENCY_FILE_DIFF, Fact::FileDiffs(Rc::new(result)));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n).map(|_| Box::new(Self) as Box<dyn PipelineItem>).collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
