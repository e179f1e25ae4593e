//! gix-backed tree-to-tree diff.
//!
//! Renames reported by gix rewrite tracking surface as `Modify` changes with
//! differing paths. As a fallback for repositories where rewrite tracking is
//! disabled by config, unambiguous delete/insert pairs with identical blob
//! OIDs are folded into renames after the walk.

use std::collections::BTreeMap;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::{from_gix_oid, to_gix_oid};
use crate::types::{ChangeAction, Oid, TreeChange};

pub fn diff_commits(
    repo: &GixRepo,
    old: Option<Oid>,
    new: Oid,
) -> Result<Vec<TreeChange>, GitError> {
    let new_tree = commit_tree(repo, new)?;
    let old_tree = old.map(|oid| commit_tree(repo, oid)).transpose()?;

    let base = match old_tree {
        Some(tree) => tree,
        None => repo.repo.empty_tree(),
    };

    let mut changes = Vec::new();
    let mut platform = base.changes().map_err(|e| GitError::Diff {
        commit: new.to_string(),
        message: e.to_string(),
    })?;

    platform
        .for_each_to_obtain_tree(&new_tree, |change| {
            use gix::object::tree::diff::Change;
            match change {
                Change::Addition {
                    location,
                    entry_mode,
                    id,
                    ..
                } => {
                    if entry_mode.is_blob() {
                        changes.push(TreeChange::insert(
                            location.to_string(),
                            from_gix_oid(id.detach()),
                        ));
                    }
                }
                Change::Deletion {
                    location,
                    entry_mode,
                    id,
                    ..
                } => {
                    if entry_mode.is_blob() {
                        changes.push(TreeChange::delete(
                            location.to_string(),
                            from_gix_oid(id.detach()),
                        ));
                    }
                }
                Change::Modification {
                    location,
                    entry_mode,
                    previous_id,
                    id,
                    ..
                } => {
                    if entry_mode.is_blob() {
                        let path = location.to_string();
                        changes.push(TreeChange::modify(
                            path.clone(),
                            path,
                            from_gix_oid(previous_id.detach()),
                            from_gix_oid(id.detach()),
                        ));
                    }
                }
                Change::Rewrite {
                    source_location,
                    source_id,
                    location,
                    entry_mode,
                    id,
                    ..
                } => {
                    if entry_mode.is_blob() {
                        changes.push(TreeChange::modify(
                            source_location.to_string(),
                            location.to_string(),
                            from_gix_oid(source_id.detach()),
                            from_gix_oid(id.detach()),
                        ));
                    }
                }
            }
            Ok::<_, std::convert::Infallible>(gix::object::tree::diff::Action::Continue)
        })
        .map_err(|e| GitError::Diff {
            commit: new.to_string(),
            message: e.to_string(),
        })?;

    let mut changes = fold_exact_renames(changes);
    changes.sort_by(|a, b| a.to_path.cmp(&b.to_path));
    Ok(changes)
}

fn commit_tree<'r>(repo: &'r GixRepo, oid: Oid) -> Result<gix::Tree<'r>, GitError> {
    let commit = repo
        .repo
        .find_commit(to_gix_oid(oid))
        .map_err(|e| GitError::NotFound {
            message: format!("commit {oid}: {e}"),
        })?;
    commit.tree().map_err(|e| GitError::Backend {
        message: format!("tree of commit {oid}: {e}"),
    })
}

/// Fold a Delete and an Insert carrying the same blob OID into one rename,
/// but only when the pairing is unambiguous (exactly one of each).
fn fold_exact_renames(changes: Vec<TreeChange>) -> Vec<TreeChange> {
    let mut deletes: BTreeMap<Oid, Vec<usize>> = BTreeMap::new();
    let mut inserts: BTreeMap<Oid, Vec<usize>> = BTreeMap::new();
    for (i, change) in changes.iter().enumerate() {
        match change.action {
            ChangeAction::Delete => deletes.entry(change.from_blob).or_default().push(i),
            ChangeAction::Insert => inserts.entry(change.to_blob).or_default().push(i),
            ChangeAction::Modify => {}
        }
    }

    let mut replaced: BTreeMap<usize, TreeChange> = BTreeMap::new();
    let mut dropped: Vec<usize> = Vec::new();
    for (blob, del_idx) in &deletes {
        let Some(ins_idx) = inserts.get(blob) else {
            continue;
        };
        if del_idx.len() != 1 || ins_idx.len() != 1 {
            continue;
        }
        let (del, ins) = (del_idx[0], ins_idx[0]);
        replaced.insert(
            del.min(ins),
            TreeChange::modify(
                changes[del].from_path.clone(),
                changes[ins].to_path.clone(),
                *blob,
                *blob,
            ),
        );
        dropped.push(del.max(ins));
    }

    if replaced.is_empty() {
        return changes;
    }
    changes
        .into_iter()
        .enumerate()
        .filter_map(|(i, change)| {
            if dropped.contains(&i) {
                None
            } else if let Some(rename) = replaced.remove(&i) {
                Some(rename)
            } else {
                Some(change)
            }
        })
        .collect()
}
