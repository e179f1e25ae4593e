//! The tree-diff feeder: per-commit file-level changes.
//!
//! Each replica diffs a commit against its *own* previous commit, which is
//! what makes per-branch replay of merge commits work: on every parent
//! branch the merge commit's diff shows exactly the lines that branch has
//! not seen yet.

use std::rc::Rc;

use strata_git::HistoryRepo;
use strata_git::Oid;

use crate::error::Result;
use crate::pipeline::{DEPENDENCY_TREE_CHANGES, Deps, Fact, PipelineItem};

/// Provides [`DEPENDENCY_TREE_CHANGES`].
#[derive(Clone, Default)]
pub struct TreeChangesItem {
    repo: Option<Rc<dyn HistoryRepo>>,
    previous: Option<Oid>,
}

impl PipelineItem for TreeChangesItem {
    fn name(&self) -> &'static str {
        "tree_changes"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_TREE_CHANGES]
    }

    fn initialize(&mut self, repo: &Rc<dyn HistoryRepo>) -> Result<()> {
        self.repo = Some(Rc::clone(repo));
        self.previous = None;
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let commit = deps.commit()?;
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| crate::error::StrataError::config("tree_changes not initialized"))?;
        let changes = repo.diff_commits(self.previous, commit.id)?;
        self.previous = Some(commit.id);
        deps.insert(DEPENDENCY_TREE_CHANGES, Fact::TreeChanges(Rc::new(changes)));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| Box::new(self.as_ref().clone()) as Box<dyn PipelineItem>)
            .collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
