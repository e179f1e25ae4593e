//! The couples analysis: co-change coupling.
//!
//! Two files couple when one commit touches both; an author couples with a
//! file by touching it. Counts accumulate over the whole history, follow
//! renames, and finalize down to the files still alive at history end.
//!
//! Aggregation state is shared across branch forks (like the burndown
//! histories), and merge commits are counted only on the primary replica, so
//! every commit contributes exactly once.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strata_git::ChangeAction;

use crate::error::Result;
use crate::pipeline::{
    DEPENDENCY_AUTHOR, DEPENDENCY_TREE_CHANGES, Deps, Facts, PipelineItem, Report,
};

// ---------------------------------------------------------------------------
// CouplesResult
// ---------------------------------------------------------------------------

/// Finalized coupling counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplesResult {
    /// Files alive at history end, sorted.
    pub file_sequence: Vec<String>,
    /// `files_matrix[i][j]`: commits touching both file `i` and file `j`
    /// (the diagonal counts the file's own commits).
    pub files_matrix: Vec<BTreeMap<usize, i64>>,
    /// Author display names, index-aligned.
    pub people_sequence: Vec<String>,
    /// `people_files[author][file]`: touches of file by author.
    pub people_files: Vec<BTreeMap<usize, i64>>,
    /// Commits per author.
    pub people_commits: Vec<i64>,
}

// ---------------------------------------------------------------------------
// CouplesAnalysis
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CouplesState {
    /// path → path → co-change count.
    files: BTreeMap<String, BTreeMap<String, i64>>,
    /// author → path → touch count.
    people_files: Vec<BTreeMap<String, i64>>,
    people_commits: Vec<i64>,
    alive: BTreeSet<String>,
}

/// The couples leaf item.
#[derive(Default)]
pub struct CouplesAnalysis {
    people: Vec<String>,
    include_empty: bool,
    shared: Rc<RefCell<CouplesState>>,
}

impl CouplesAnalysis {
    fn rename(state: &mut CouplesState, from: &str, to: &str) {
        if let Some(row) = state.files.remove(from) {
            let target = state.files.entry(to.to_owned()).or_default();
            for (other, count) in row {
                *target.entry(other.clone()).or_default() += count;
            }
        }
        let keys: Vec<String> = state.files.keys().cloned().collect();
        for key in keys {
            if let Some(row) = state.files.get_mut(&key) {
                if let Some(count) = row.remove(from) {
                    *row.entry(to.to_owned()).or_default() += count;
                }
            }
        }
        for person in &mut state.people_files {
            if let Some(count) = person.remove(from) {
                *person.entry(to.to_owned()).or_default() += count;
            }
        }
        if state.alive.remove(from) {
            state.alive.insert(to.to_owned());
        }
    }
}

impl PipelineItem for CouplesAnalysis {
    fn name(&self) -> &'static str {
        "couples"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[DEPENDENCY_AUTHOR, DEPENDENCY_TREE_CHANGES]
    }

    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        self.people = facts.people.clone();
        self.include_empty = facts.config.empty_commits;
        let mut state = self.shared.borrow_mut();
        state.people_files = vec![BTreeMap::new(); self.people.len()];
        state.people_commits = vec![0; self.people.len()];
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        // Merge commits replay once per parent branch; count them once, and
        // only their structural effect (renames, liveness).
        let is_merge = deps.is_merge()?;
        let primary = deps.merge_primary()?;
        let author = deps.author()? as usize;
        let changes = Rc::clone(deps.tree_changes()?);

        let state = &mut *self.shared.borrow_mut();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for change in changes.iter() {
            match change.action {
                ChangeAction::Insert => {
                    state.alive.insert(change.to_path.clone());
                    touched.insert(change.to_path.clone());
                }
                ChangeAction::Delete => {
                    state.alive.remove(&change.from_path);
                }
                ChangeAction::Modify => {
                    if change.is_rename() {
                        Self::rename(state, &change.from_path, &change.to_path);
                    }
                    touched.insert(change.to_path.clone());
                }
            }
        }

        if is_merge || !primary {
            return Ok(());
        }
        if touched.is_empty() && !self.include_empty {
            return Ok(());
        }

        if let Some(commits) = state.people_commits.get_mut(author) {
            *commits += 1;
        }
        for path in &touched {
            if let Some(person) = state.people_files.get_mut(author) {
                *person.entry(path.clone()).or_default() += 1;
            }
            let row = state.files.entry(path.clone()).or_default();
            for other in &touched {
                *row.entry(other.clone()).or_default() += 1;
            }
        }
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| {
                Box::new(Self {
                    people: self.people.clone(),
                    include_empty: self.include_empty,
                    shared: Rc::clone(&self.shared),
                }) as Box<dyn PipelineItem>
            })
            .collect()
    }

    fn finalize(&mut self) -> Result<Option<Report>> {
        let state = self.shared.borrow();
        let file_sequence: Vec<String> = state.alive.iter().cloned().collect();
        let index_of: BTreeMap<&str, usize> = file_sequence
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut files_matrix = vec![BTreeMap::new(); file_sequence.len()];
        for (path, row) in &state.files {
            let Some(&i) = index_of.get(path.as_str()) else {
                continue; // dead file
            };
            for (other, &count) in row {
                if let Some(&j) = index_of.get(other.as_str()) {
                    *files_matrix[i].entry(j).or_default() += count;
                }
            }
        }

        let mut people_files = vec![BTreeMap::new(); self.people.len()];
        for (author, counts) in state.people_files.iter().enumerate() {
            for (path, &count) in counts {
                if let Some(&j) = index_of.get(path.as_str()) {
                    *people_files[author].entry(j).or_default() += count;
                }
            }
        }

        Ok(Some(Report::Couples(CouplesResult {
            file_sequence,
            files_matrix,
            people_sequence: self.people.clone(),
            people_files,
            people_commits: state.people_commits.clone(),
        })))
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::{
        DEPENDENCY_COMMIT, DEPENDENCY_IS_MERGE, DEPENDENCY_MERGE_PRIMARY, Fact,
    };
    use strata_git::{CommitNode, Oid, TreeChange};

    fn consume(
        analysis: &mut CouplesAnalysis,
        author: u32,
        is_merge: bool,
        primary: bool,
        changes: Vec<TreeChange>,
    ) {
        let mut deps = Deps::new();
        deps.insert(
            DEPENDENCY_COMMIT,
            Fact::Commit(Rc::new(CommitNode {
                id: Oid::from_bytes([9; 20]),
                parents: Vec::new(),
                author_name: "x".to_owned(),
                author_email: "x@x".to_owned(),
                timestamp: 0,
            })),
        );
        deps.insert(DEPENDENCY_IS_MERGE, Fact::Bool(is_merge));
        deps.insert(DEPENDENCY_MERGE_PRIMARY, Fact::Bool(primary));
        deps.insert(DEPENDENCY_AUTHOR, Fact::Author(author));
        deps.insert(
            crate::pipeline::DEPENDENCY_TREE_CHANGES,
            Fact::TreeChanges(Rc::new(changes)),
        );
        analysis.consume(&mut deps).unwrap();
    }

    fn analysis(people: &[&str]) -> CouplesAnalysis {
        let mut a = CouplesAnalysis::default();
        let mut facts = Facts::new(Config::default(), Vec::new());
        facts.people = people.iter().map(|&p| p.to_owned()).collect();
        a.configure(&mut facts).unwrap();
        a
    }

    fn oid(b: u8) -> Oid {
        Oid::from_bytes([b; 20])
    }

    fn report(analysis: &mut CouplesAnalysis) -> CouplesResult {
        match analysis.finalize().unwrap() {
            Some(Report::Couples(r)) => r,
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn co_changed_files_couple() {
        let mut a = analysis(&["alice"]);
        consume(
            &mut a,
            0,
            false,
            true,
            vec![
                TreeChange::insert("a.rs", oid(1)),
                TreeChange::insert("b.rs", oid(2)),
            ],
        );
        consume(
            &mut a,
            0,
            false,
            true,
            vec![TreeChange::modify("a.rs", "a.rs", oid(1), oid(3))],
        );
        let r = report(&mut a);
        assert_eq!(r.file_sequence, vec!["a.rs", "b.rs"]);
        assert_eq!(r.files_matrix[0][&1], 1); // coupled once
        assert_eq!(r.files_matrix[0][&0], 2); // a.rs touched twice
        assert_eq!(r.files_matrix[1][&1], 1);
        assert_eq!(r.people_commits, vec![2]);
        assert_eq!(r.people_files[0][&0], 2);
    }

    #[test]
    fn dead_files_drop_from_the_matrix() {
        let mut a = analysis(&["alice"]);
        consume(
            &mut a,
            0,
            false,
            true,
            vec![
                TreeChange::insert("a.rs", oid(1)),
                TreeChange::insert("b.rs", oid(2)),
            ],
        );
        consume(&mut a, 0, false, true, vec![TreeChange::delete("b.rs", oid(2))]);
        let r = report(&mut a);
        assert_eq!(r.file_sequence, vec!["a.rs"]);
        assert_eq!(r.files_matrix.len(), 1);
        assert!(r.files_matrix[0].keys().all(|&j| j == 0));
    }

    #[test]
    fn renames_carry_counts() {
        let mut a = analysis(&["alice"]);
        consume(
            &mut a,
            0,
            false,
            true,
            vec![
                TreeChange::insert("old.rs", oid(1)),
                TreeChange::insert("peer.rs", oid(2)),
            ],
        );
        consume(
            &mut a,
            0,
            false,
            true,
            vec![TreeChange::modify("old.rs", "new.rs", oid(1), oid(1))],
        );
        let r = report(&mut a);
        assert_eq!(r.file_sequence, vec!["new.rs", "peer.rs"]);
        let new_idx = 0;
        let peer_idx = 1;
        // The old coupling follows the rename.
        assert_eq!(r.files_matrix[new_idx][&peer_idx], 1);
        assert_eq!(r.people_files[0][&new_idx], 2);
    }

    #[test]
    fn merge_commits_do_not_count() {
        let mut a = analysis(&["alice"]);
        consume(&mut a, 0, false, true, vec![TreeChange::insert("a.rs", oid(1))]);
        consume(
            &mut a,
            0,
            true,
            true,
            vec![TreeChange::modify("a.rs", "a.rs", oid(1), oid(2))],
        );
        let r = report(&mut a);
        assert_eq!(r.people_commits, vec![1]);
        assert_eq!(r.files_matrix[0][&0], 1);
    }

    #[test]
    fn empty_commits_skipped_by_default() {
        let mut a = analysis(&["alice"]);
        consume(&mut a, 0, false, true, Vec::new());
        let r = report(&mut a);
        assert_eq!(r.people_commits, vec![0]);
    }
}
