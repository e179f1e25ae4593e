//! The pipeline runtime: item contract, fact bag, planner, and executor.
//!
//! A pipeline is a set of [`PipelineItem`]s with declared `provides` /
//! `requires` fact lists. The planner ([`registry`]) pulls in the feeder
//! items a requested analysis needs and orders everything topologically; the
//! executor ([`executor`]) walks the commit DAG once, forking item replicas
//! at branch points and merging them at joins.
//!
//! Facts flowing between items during one commit live in a [`Deps`] bag
//! keyed by `&'static str` — a tagged enum per feeder kind, no reflection.

pub mod executor;
pub mod registry;

use std::collections::BTreeMap;
use std::rc::Rc;

use strata_git::{CommitNode, HistoryRepo, Oid, TreeChange};

use crate::burndown::BurndownResult;
use crate::commits::CommitsResult;
use crate::config::Config;
use crate::couples::CouplesResult;
use crate::devs::DevsResult;
use crate::error::{Result, StrataError};
use crate::file::FileDiffData;
use crate::items::blob_cache::CachedBlob;
use crate::items::line_stats::LineStats;

// ---------------------------------------------------------------------------
// Dependency names
// ---------------------------------------------------------------------------

/// The commit under replay. Always present.
pub const DEPENDENCY_COMMIT: &str = "commit";
/// Whether the commit joins branches. Always present.
pub const DEPENDENCY_IS_MERGE: &str = "is_merge";
/// True on the first-parent replica of a merge commit (and on every
/// non-merge commit); lets once-per-commit leaves dedupe. Always present.
pub const DEPENDENCY_MERGE_PRIMARY: &str = "merge_primary";
/// Ticks since the first commit.
pub const DEPENDENCY_TICK: &str = "tick";
/// Author index into the identity dictionary.
pub const DEPENDENCY_AUTHOR: &str = "author";
/// Tree changes against the owning branch's previous commit.
pub const DEPENDENCY_TREE_CHANGES: &str = "tree_changes";
/// Line-level diffs for modified files.
pub const DEPENDENCY_FILE_DIFF: &str = "file_diff";
/// Blob bytes and line counts for both sides of every change.
pub const DEPENDENCY_BLOB_CACHE: &str = "blob_cache";
/// Per-commit added/removed/changed line totals.
pub const DEPENDENCY_LINE_STATS: &str = "line_stats";

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// One value in the [`Deps`] bag — a tagged variant per feeder kind.
#[derive(Clone, Debug)]
pub enum Fact {
    /// The commit under replay.
    Commit(Rc<CommitNode>),
    /// A boolean flag (`is_merge`, `merge_primary`).
    Bool(bool),
    /// The commit's tick.
    Tick(i64),
    /// The commit's author index.
    Author(u32),
    /// Tree changes for this commit on this branch.
    TreeChanges(Rc<Vec<TreeChange>>),
    /// Line diffs keyed by post-change path.
    FileDiffs(Rc<BTreeMap<String, FileDiffData>>),
    /// Blob cache keyed by blob OID.
    BlobCache(Rc<BTreeMap<Oid, CachedBlob>>),
    /// Per-commit line totals.
    LineStats(LineStats),
}

// ---------------------------------------------------------------------------
// Deps
// ---------------------------------------------------------------------------

/// The per-commit fact bag. Feeders insert their outputs; downstream items
/// read them through typed accessors that turn absence into a configuration
/// error (absence means the planner let a requirement through unsatisfied).
#[derive(Debug, Default)]
pub struct Deps {
    facts: BTreeMap<&'static str, Fact>,
}

impl Deps {
    /// An empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a fact.
    pub fn insert(&mut self, name: &'static str, fact: Fact) {
        self.facts.insert(name, fact);
    }

    fn get(&self, name: &'static str) -> Result<&Fact> {
        self.facts.get(name).ok_or_else(|| {
            StrataError::config(format!("dependency '{name}' missing from the deps bag"))
        })
    }

    /// The commit under replay.
    pub fn commit(&self) -> Result<&Rc<CommitNode>> {
        match self.get(DEPENDENCY_COMMIT)? {
            Fact::Commit(c) => Ok(c),
            other => Err(mistyped(DEPENDENCY_COMMIT, other)),
        }
    }

    /// Whether the commit joins branches.
    pub fn is_merge(&self) -> Result<bool> {
        match self.get(DEPENDENCY_IS_MERGE)? {
            Fact::Bool(b) => Ok(*b),
            other => Err(mistyped(DEPENDENCY_IS_MERGE, other)),
        }
    }

    /// Whether this replica is the primary consumer of the commit.
    pub fn merge_primary(&self) -> Result<bool> {
        match self.get(DEPENDENCY_MERGE_PRIMARY)? {
            Fact::Bool(b) => Ok(*b),
            other => Err(mistyped(DEPENDENCY_MERGE_PRIMARY, other)),
        }
    }

    /// The commit's tick.
    pub fn tick(&self) -> Result<i64> {
        match self.get(DEPENDENCY_TICK)? {
            Fact::Tick(t) => Ok(*t),
            other => Err(mistyped(DEPENDENCY_TICK, other)),
        }
    }

    /// The commit's author index.
    pub fn author(&self) -> Result<u32> {
        match self.get(DEPENDENCY_AUTHOR)? {
            Fact::Author(a) => Ok(*a),
            other => Err(mistyped(DEPENDENCY_AUTHOR, other)),
        }
    }

    /// Tree changes for this commit.
    pub fn tree_changes(&self) -> Result<&Rc<Vec<TreeChange>>> {
        match self.get(DEPENDENCY_TREE_CHANGES)? {
            Fact::TreeChanges(c) => Ok(c),
            other => Err(mistyped(DEPENDENCY_TREE_CHANGES, other)),
        }
    }

    /// Line diffs keyed by post-change path.
    pub fn file_diffs(&self) -> Result<&Rc<BTreeMap<String, FileDiffData>>> {
        match self.get(DEPENDENCY_FILE_DIFF)? {
            Fact::FileDiffs(d) => Ok(d),
            other => Err(mistyped(DEPENDENCY_FILE_DIFF, other)),
        }
    }

    /// Blob cache for both sides of every change.
    pub fn blob_cache(&self) -> Result<&Rc<BTreeMap<Oid, CachedBlob>>> {
        match self.get(DEPENDENCY_BLOB_CACHE)? {
            Fact::BlobCache(b) => Ok(b),
            other => Err(mistyped(DEPENDENCY_BLOB_CACHE, other)),
        }
    }

    /// Per-commit line totals.
    pub fn line_stats(&self) -> Result<LineStats> {
        match self.get(DEPENDENCY_LINE_STATS)? {
            Fact::LineStats(s) => Ok(*s),
            other => Err(mistyped(DEPENDENCY_LINE_STATS, other)),
        }
    }
}

fn mistyped(name: &str, fact: &Fact) -> StrataError {
    StrataError::config(format!(
        "dependency '{name}' carries an unexpected fact variant: {fact:?}"
    ))
}

// ---------------------------------------------------------------------------
// Facts (configure-time)
// ---------------------------------------------------------------------------

/// The global fact bag handed to every item's `configure`: user options, the
/// collected commit list, and the identity dictionary (filled in by the
/// identity detector for items configured after it).
#[derive(Debug)]
pub struct Facts {
    /// User-facing options.
    pub config: Config,
    /// The commit DAG in topological order.
    pub commits: Vec<Rc<CommitNode>>,
    /// Author names, index-aligned with [`DEPENDENCY_AUTHOR`] values.
    pub people: Vec<String>,
}

impl Facts {
    /// Facts for a run over `commits` with the given options.
    #[must_use]
    pub fn new(config: Config, commits: Vec<Rc<CommitNode>>) -> Self {
        Self {
            config,
            commits,
            people: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A finalized analysis result, one variant per leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    /// Line-survival matrices.
    Burndown(BurndownResult),
    /// Co-change coupling counts.
    Couples(CouplesResult),
    /// Per-tick per-author activity.
    Devs(DevsResult),
    /// Chronological per-commit line stats.
    Commits(CommitsResult),
}

// ---------------------------------------------------------------------------
// PipelineItem
// ---------------------------------------------------------------------------

/// One unit of the pipeline: a feeder producing facts, or a leaf analysis
/// consuming them.
///
/// Items run single-threaded in topological order within each commit.
/// `consume` writes any produced facts straight into the `deps` bag for the
/// items downstream.
pub trait PipelineItem {
    /// Unique item name.
    fn name(&self) -> &'static str;

    /// Facts this item writes into the deps bag.
    fn provides(&self) -> &'static [&'static str] {
        &[]
    }

    /// Facts this item reads from the deps bag.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validate options and prime configuration-derived state. Items run in
    /// topological order, so facts written here (e.g. the identity
    /// dictionary) are visible to downstream items' `configure`.
    ///
    /// # Errors
    ///
    /// [`StrataError::Configuration`] on invalid options.
    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        let _ = facts;
        Ok(())
    }

    /// Prime per-run state against the repository.
    ///
    /// # Errors
    ///
    /// Any error aborts the run before the first commit.
    fn initialize(&mut self, repo: &Rc<dyn HistoryRepo>) -> Result<()> {
        let _ = repo;
        Ok(())
    }

    /// Process one commit on the owning branch.
    ///
    /// # Errors
    ///
    /// Fatal errors abort the run; others skip the commit on this branch.
    fn consume(&mut self, deps: &mut Deps) -> Result<()>;

    /// Split this replica into `n` independent replicas, one per outgoing
    /// branch. Aggregation state that must be counted once per run is shared
    /// (see the burndown analysis); per-branch state is deep-copied.
    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>>;

    /// Collapse sibling replicas into `self` at a merge commit. Called after
    /// every involved replica has consumed the merge commit.
    ///
    /// # Errors
    ///
    /// Integrity errors abort the run.
    fn merge(&mut self, siblings: Vec<Box<dyn PipelineItem>>) -> Result<()> {
        drop(siblings);
        Ok(())
    }

    /// Spill expensive state between consumes. Only items owning an arena do
    /// anything here.
    ///
    /// # Errors
    ///
    /// I/O errors from the spill.
    fn hibernate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Undo [`hibernate`](Self::hibernate).
    ///
    /// # Errors
    ///
    /// I/O errors from reloading the image.
    fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produce the final result. Feeders return `None`.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn finalize(&mut self) -> Result<Option<Report>> {
        Ok(None)
    }

    /// Emit a finalized report in text or binary form. The default covers
    /// every report variant; items only override to change their framing.
    ///
    /// # Errors
    ///
    /// [`StrataError::Io`] on write failure.
    fn serialize(
        &self,
        report: &Report,
        binary: bool,
        writer: &mut dyn std::io::Write,
    ) -> Result<()> {
        let reports = [(self.name().to_owned(), report.clone())];
        if binary {
            crate::output::write_binary(&reports, writer)
        } else {
            crate::output::write_text(&reports, writer).map_err(|e| StrataError::Io {
                path: std::path::PathBuf::from("<output>"),
                source: e,
            })
        }
    }

    /// Erase to [`std::any::Any`] so `merge` implementations can downcast
    /// sibling replicas back to their concrete type.
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_missing_fact_is_config_error() {
        let deps = Deps::new();
        let err = deps.tick().unwrap_err();
        assert!(matches!(err, StrataError::Configuration { .. }));
        assert!(format!("{err}").contains("tick"));
    }

    #[test]
    fn deps_mistyped_fact_is_config_error() {
        let mut deps = Deps::new();
        deps.insert(DEPENDENCY_TICK, Fact::Bool(true));
        let err = deps.tick().unwrap_err();
        assert!(matches!(err, StrataError::Configuration { .. }));
    }

    #[test]
    fn deps_roundtrip_typed_values() {
        let mut deps = Deps::new();
        deps.insert(DEPENDENCY_TICK, Fact::Tick(42));
        deps.insert(DEPENDENCY_IS_MERGE, Fact::Bool(false));
        deps.insert(DEPENDENCY_AUTHOR, Fact::Author(3));
        assert_eq!(deps.tick().unwrap(), 42);
        assert!(!deps.is_merge().unwrap());
        assert_eq!(deps.author().unwrap(), 3);
    }

    #[test]
    fn default_serialize_frames_text_and_binary() {
        struct Leaf;
        impl PipelineItem for Leaf {
            fn name(&self) -> &'static str {
                "commits_stat"
            }
            fn consume(&mut self, _deps: &mut Deps) -> crate::error::Result<()> {
                Ok(())
            }
            fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
                (0..n).map(|_| Box::new(Self) as Box<dyn PipelineItem>).collect()
            }
            fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
                self
            }
        }

        let leaf = Leaf;
        let report = Report::Commits(CommitsResult::default());

        let mut text = Vec::new();
        leaf.serialize(&report, false, &mut text).unwrap();
        assert!(String::from_utf8(text).unwrap().starts_with("commits_stat:"));

        let mut binary = Vec::new();
        leaf.serialize(&report, true, &mut binary).unwrap();
        let records = crate::output::read_records(&mut binary.as_slice()).unwrap();
        assert_eq!(records[0].name, "commits_stat");
    }
}
