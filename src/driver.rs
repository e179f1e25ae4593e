//! The top-level driver: load history, plan the pipeline, run it.

use std::rc::Rc;

use strata_git::{CommitNode, HistoryRepo};

use crate::burndown::BurndownAnalysis;
use crate::commits::CommitsAnalysis;
use crate::config::Config;
use crate::couples::CouplesAnalysis;
use crate::devs::DevsAnalysis;
use crate::error::{Result, StrataError};
use crate::items;
use crate::pipeline::{Facts, PipelineItem, Report, executor, registry};

/// Which leaf analyses to run.
#[derive(Clone, Copy, Debug, Default)]
pub struct Toggles {
    /// Line-survival matrices.
    pub burndown: bool,
    /// Co-change coupling.
    pub couples: bool,
    /// Per-tick per-author activity.
    pub devs: bool,
    /// Chronological per-commit stats.
    pub commits_stat: bool,
}

impl Toggles {
    /// `true` when nothing was requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.burndown || self.couples || self.devs || self.commits_stat)
    }
}

/// Replay the repository's history through the requested analyses.
///
/// # Errors
///
/// Configuration errors from planning, fatal item errors from the run.
pub fn run_analyses(
    repo: &Rc<dyn HistoryRepo>,
    config: Config,
    toggles: Toggles,
) -> Result<Vec<(String, Report)>> {
    if toggles.is_empty() {
        return Err(StrataError::config(
            "no analyses requested; enable at least one of --burndown, --couples, --devs, \
             --commits-stat",
        ));
    }

    let config = config.repaired();
    let head = config.head.clone();
    let commits: Vec<Rc<CommitNode>> = repo
        .load_history(head.as_deref())?
        .into_iter()
        .map(Rc::new)
        .collect();
    tracing::info!(commits = commits.len(), "history loaded");

    let mut facts = Facts::new(config, commits.clone());

    let mut leaves: Vec<Box<dyn PipelineItem>> = Vec::new();
    if toggles.burndown {
        leaves.push(Box::new(BurndownAnalysis::default()));
    }
    if toggles.couples {
        leaves.push(Box::new(CouplesAnalysis::default()));
    }
    if toggles.devs {
        leaves.push(Box::new(DevsAnalysis::default()));
    }
    if toggles.commits_stat {
        leaves.push(Box::new(CommitsAnalysis::default()));
    }

    let items = registry::plan(leaves, items::all_feeders())?;
    executor::run(repo, &commits, items, &mut facts)
}
