//! The devs analysis: per-tick per-author activity.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::items::line_stats::LineStats;
use crate::pipeline::{
    DEPENDENCY_AUTHOR, DEPENDENCY_LINE_STATS, DEPENDENCY_TICK, DEPENDENCY_TREE_CHANGES, Deps,
    Facts, PipelineItem, Report,
};

/// Activity of one author within one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevTick {
    /// Commits authored.
    pub commits: i64,
    /// Lines added.
    pub added: i64,
    /// Lines removed.
    pub removed: i64,
    /// Lines changed in place.
    pub changed: i64,
}

/// Finalized per-tick per-author activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevsResult {
    /// `ticks[tick][author]` — only ticks and authors with activity appear.
    pub ticks: BTreeMap<u32, BTreeMap<u32, DevTick>>,
    /// Author display names, index-aligned with the author keys.
    pub people: Vec<String>,
}

/// The devs leaf item. Aggregation is shared across forks; merge commits
/// count on the primary replica only.
#[derive(Default)]
pub struct DevsAnalysis {
    people: Vec<String>,
    include_empty: bool,
    shared: Rc<RefCell<BTreeMap<u32, BTreeMap<u32, DevTick>>>>,
}

impl PipelineItem for DevsAnalysis {
    fn name(&self) -> &'static str {
        "devs"
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
        self.people = facts.people.clone();
        self.include_empty = facts.config.empty_commits;
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        if !deps.merge_primary()? {
            return Ok(());
        }
        let changes_empty = deps.tree_changes()?.is_empty();
        if changes_empty && !self.include_empty {
            return Ok(());
        }
        let tick64 = deps.tick()?;
        let tick = u32::try_from(tick64)
            .map_err(|_| StrataError::config(format!("tick {tick64} out of range")))?;
        let author = deps.author()?;
        let stats: LineStats = deps.line_stats()?;

        let mut shared = self.shared.borrow_mut();
        let cell = shared.entry(tick).or_default().entry(author).or_default();
        cell.commits += 1;
        cell.added += stats.added;
        cell.removed += stats.removed;
        cell.changed += stats.changed;
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
        Ok(Some(Report::Devs(DevsResult {
            ticks: self.shared.borrow().clone(),
            people: self.people.clone(),
        })))
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
