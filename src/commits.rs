//! The commits-stat analysis: chronological per-commit line stats.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::items::line_stats::LineStats;
use crate::pipeline::{
    DEPENDENCY_AUTHOR, DEPENDENCY_LINE_STATS, DEPENDENCY_TICK, DEPENDENCY_TREE_CHANGES, Deps,
    Facts, PipelineItem, Report,
};

/// One commit's line stats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStat {
    /// Commit OID as hex.
    pub hash: String,
    /// Tick of the commit.
    pub tick: i64,
    /// Author index.
    pub author: u32,
    /// Lines added.
    pub added: i64,
    /// Lines removed.
    pub removed: i64,
    /// Lines changed in place.
    pub changed: i64,
}

/// Finalized chronological stats.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitsResult {
    /// One entry per counted commit, in replay order.
    pub commits: Vec<CommitStat>,
}

/// The commits-stat leaf item.
#[derive(Default)]
pub struct CommitsAnalysis {
    include_empty: bool,
    shared: Rc<RefCell<Vec<CommitStat>>>,
}

impl PipelineItem for CommitsAnalysis {
    fn name(&self) -> &'static str {
        "commits_stat"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[
            DEPENDENCY_TICK,
            DEPENDENCY_AUTHOR,
            DEPENDENCY_TREE_CHANGES,
            DEPENDENCY_LINE_STATS,
        ]
    }

    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        self.include_empty = facts.config.empty_commits;
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        if !deps.merge_primary()? {
            return Ok(());
        }
        if deps.tree_changes()?.is_empty() && !self.include_empty {
            return Ok(());
        }
        let commit = deps.commit()?;
        let stats: LineStats = deps.line_stats()?;
        self.shared.borrow_mut().push(CommitStat {
            hash: commit.id.to_string(),
            tick: deps.tick()?,
            author: deps.author()?,
            added: stats.added,
            removed: stats.removed,
            changed: stats.changed,
        });
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| {
                Box::new(Self {
                    include_empty: self.include_empty,
                    shared: Rc::clone(&self.shared),
                }) as Box<dyn PipelineItem>
            })
            .collect()
    }

    fn finalize(&mut self) -> Result<Option<Report>> {
        Ok(Some(Report::Commits(CommitsResult {
            commits: self.shared.borrow().clone(),
        })))
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DEPENDENCY_COMMIT, DEPENDENCY_IS_MERGE, DEPENDENCY_MERGE_PRIMARY, Fact};
    use strata_git::{CommitNode, Oid, TreeChange};

    fn consume(a: &mut CommitsAnalysis, id: u8, tick: i64, primary: bool) {
        let mut deps = Deps::new();
        deps.insert(
            DEPENDENCY_COMMIT,
            Fact::Commit(Rc::new(CommitNode {
                id: Oid::from_bytes([id; 20]),
                parents: Vec::new(),
                author_name: "a".to_owned(),
                author_email: "a@x".to_owned(),
                timestamp: 0,
            })),
        );
        deps.insert(DEPENDENCY_IS_MERGE, Fact::Bool(false));
        deps.insert(DEPENDENCY_MERGE_PRIMARY, Fact::Bool(primary));
        deps.insert(DEPENDENCY_TICK, Fact::Tick(tick));
        deps.insert(DEPENDENCY_AUTHOR, Fact::Author(0));
        deps.insert(
            DEPENDENCY_TREE_CHANGES,
            Fact::TreeChanges(Rc::new(vec![TreeChange::insert(
                "x.rs",
                Oid::from_bytes([1; 20]),
            )])),
        );
        deps.insert(
            DEPENDENCY_LINE_STATS,
            Fact::LineStats(LineStats {
                added: 3,
                removed: 1,
                changed: 0,
            }),
        );
        a.consume(&mut deps).unwrap();
    }

    #[test]
    fn commits_append_in_replay_order() {
        let mut a = CommitsAnalysis::default();
        consume(&mut a, 1, 0, true);
        consume(&mut a, 2, 5, true);
        consume(&mut a, 3, 5, false); // non-primary replica, skipped

        let r = match a.finalize().unwrap() {
            Some(Report::Commits(r)) => r,
            other => panic!("unexpected report {other:?}"),
        };
        assert_eq!(r.commits.len(), 2);
        assert_eq!(r.commits[0].hash, "01".repeat(20));
        assert_eq!(r.commits[1].tick, 5);
        assert_eq!(r.commits[0].added, 3);
    }
}
