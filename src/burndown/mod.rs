//! The burndown analysis: line survival through time.
//!
//! For every tracked file the analysis maintains a line-ownership tree; every
//! transition the trees report is aggregated into four sparse histories —
//! global, per-file, per-author, and the author-interaction matrix. Finalize
//! re-samples the sparse streams into dense `samples × bands` matrices.
//!
//! # Branching
//!
//! `fork` deep-copies the file trees into a fresh arena per replica but
//! *shares* the aggregation state (`Rc<RefCell<…>>`, the executor is
//! single-threaded): a line booked on one branch is booked for the run. At a
//! merge commit every parent replica consumes the commit against its own
//! parent — writing transient [`MERGE_MARK`] attributions — and `merge`
//! reconciles the replica trees per file, resolving leftover marks to the
//! merge tick and booking only the lines the merge commit itself authored.

pub mod history;
pub mod merge;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strata_git::{Oid, TreeChange};

use crate::arena::NodeArena;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::file::{File, FileDiffData};
use crate::items::blob_cache::CachedBlob;
use crate::pipeline::{
    DEPENDENCY_AUTHOR, DEPENDENCY_BLOB_CACHE, DEPENDENCY_FILE_DIFF, DEPENDENCY_TICK,
    DEPENDENCY_TREE_CHANGES, Deps, Facts, PipelineItem, Report,
};
use crate::status::{AUTHOR_SELF, MERGE_MARK, Status};
use crate::tree::{DeltaSink, TreeError};

use history::{DenseHistory, SparseHistory, group_sparse_history, record};

// ---------------------------------------------------------------------------
// BurndownResult
// ---------------------------------------------------------------------------

/// The finalized burndown matrices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BurndownResult {
    /// Band width in ticks.
    pub granularity: u32,
    /// Snapshot distance in ticks.
    pub sampling: u32,
    /// Tick size in seconds.
    pub tick_size_secs: i64,
    /// Unix time where tick 0 starts.
    pub first_tick_time: i64,
    /// The last tick of the run.
    pub last_tick: u32,
    /// Whole-repository survival matrix.
    pub project: DenseHistory,
    /// Per-file survival matrices, live files only.
    pub files: BTreeMap<String, DenseHistory>,
    /// Per-file line ownership at history end: author index (−1 = unknown)
    /// to owned line count.
    pub files_ownership: BTreeMap<String, BTreeMap<i32, i64>>,
    /// Author display names, index-aligned with `people`.
    pub people_sequence: Vec<String>,
    /// Per-author survival matrices.
    pub people: Vec<DenseHistory>,
    /// Author-interaction rows of `people_sequence.len() + 2` columns:
    /// column 0 totals lines authored, column 1 removals by unknown authors,
    /// column `2 + j` removals by author `j`.
    pub people_interaction: Vec<Vec<i64>>,
}

// ---------------------------------------------------------------------------
// Shared aggregation state
// ---------------------------------------------------------------------------

/// The sparse histories shared by every replica of one run.
#[derive(Debug, Default)]
struct Histories {
    global: SparseHistory,
    files: BTreeMap<String, SparseHistory>,
    people: Vec<SparseHistory>,
    matrix: Vec<BTreeMap<u32, i64>>,
}

/// The four updater effects, applied per transition.
struct HistorySink<'a> {
    global: &'a mut SparseHistory,
    file: Option<&'a mut SparseHistory>,
    people: &'a mut [SparseHistory],
    matrix: &'a mut [BTreeMap<u32, i64>],
    track_people: bool,
}

impl DeltaSink for HistorySink<'_> {
    fn record(&mut self, current: Status, previous: Status, delta: i64) {
        let cur_tick = current.tick();
        let prev_tick = previous.tick();
        record(self.global, cur_tick, prev_tick, delta);
        if let Some(file) = self.file.as_deref_mut() {
            record(file, cur_tick, prev_tick, delta);
        }
        if !self.track_people {
            return;
        }
        let prev_author = previous.author() as usize;
        if let Some(person) = self.people.get_mut(prev_author) {
            record(person, cur_tick, prev_tick, delta);
        }
        // The interaction matrix is not tick-keyed, so transient merge-mark
        // attributions must not reach it; the tree merge books the resolved
        // ranges exactly once.
        if cur_tick == MERGE_MARK {
            return;
        }
        if let Some(row) = self.matrix.get_mut(prev_author) {
            let mut new_author = current.author();
            if new_author == previous.author() && delta > 0 {
                new_author = AUTHOR_SELF;
            }
            *row.entry(new_author).or_default() += delta;
        }
    }
}


/// Split the shared histories into one sink, field by field, so the per-file
/// entry and the other maps can be borrowed together.
fn make_sink<'a>(
    hist: &'a mut Histories,
    file_name: Option<&str>,
    track_files: bool,
    track_people: bool,
) -> HistorySink<'a> {
    let Histories {
        global,
        files,
        people,
        matrix,
    } = hist;
    let file = match file_name {
        Some(name) if track_files => Some(files.entry(name.to_owned()).or_default()),
        _ => None,
    };
    HistorySink {
        global,
        file,
        people,
        matrix,
        track_people,
    }
}

// ---------------------------------------------------------------------------
// BurndownAnalysis
// ---------------------------------------------------------------------------

/// The burndown leaf item. See the module docs for the branching model.
pub struct BurndownAnalysis {
    granularity: u32,
    sampling: u32,
    track_files: bool,
    track_people: bool,
    debug: bool,
    tick_size_secs: i64,
    first_tick_time: i64,
    hibernation_threshold: usize,
    hibernation_to_disk: bool,
    hibernation_dir: PathBuf,

    people: Vec<String>,

    arena: NodeArena,
    files: BTreeMap<String, File>,
    renames: BTreeMap<String, String>,
    /// Per-path outcome while consuming a merge commit: `true` = updated,
    /// `false` = unmergeable (binary, conflict) and to be dropped at join.
    merged_files: BTreeMap<String, bool>,
    /// `(tick, author)` of the merge commit currently being joined.
    merge_state: Option<(u32, u32)>,

    shared: Rc<RefCell<Histories>>,
}

impl Default for BurndownAnalysis {
    fn default() -> Self {
        Self {
            granularity: 30,
            sampling: 30,
            track_files: false,
            track_people: false,
            debug: false,
            tick_size_secs: 24 * 3600,
            first_tick_time: 0,
            hibernation_threshold: 0,
            hibernation_to_disk: false,
            hibernation_dir: PathBuf::new(),
            people: Vec::new(),
            arena: NodeArena::new(),
            files: BTreeMap::new(),
            renames: BTreeMap::new(),
            merged_files: BTreeMap::new(),
            merge_state: None,
            shared: Rc::new(RefCell::new(Histories::default())),
        }
    }
}

impl BurndownAnalysis {
    /// An analysis configured straight from options, for driving outside a
    /// full pipeline (tests, embedding).
    #[must_use]
    pub fn with_options(config: &Config, people: Vec<String>) -> Self {
        let mut this = Self {
            granularity: config.granularity,
            sampling: config.sampling,
            track_files: config.burndown_files,
            track_people: config.burndown_people,
            debug: config.burndown_debug,
            tick_size_secs: config.tick_size_secs,
            hibernation_threshold: config.hibernation_threshold,
            hibernation_to_disk: config.hibernation_to_disk,
            hibernation_dir: config.hibernation_dir.clone(),
            people,
            ..Self::default()
        };
        this.repair_options();
        let count = this.people.len();
        let mut hist = this.shared.borrow_mut();
        hist.people = vec![SparseHistory::new(); count];
        hist.matrix = vec![BTreeMap::new(); count];
        drop(hist);
        this
    }

    fn repair_options(&mut self) {
        if self.granularity == 0 {
            tracing::warn!("granularity must be positive, falling back to 30");
            self.granularity = 30;
        }
        if self.sampling == 0 {
            tracing::warn!("sampling must be positive, falling back to granularity");
            self.sampling = self.granularity;
        }
        if self.sampling > self.granularity {
            tracing::warn!(
                sampling = self.sampling,
                granularity = self.granularity,
                "sampling cannot exceed granularity, clamping"
            );
            self.sampling = self.granularity;
        }
    }

    fn status_for(&self, author: u32, tick: u32) -> Status {
        Status::new(author, tick)
    }

    /// Follow recorded renames until a tracked path (or a dead end).
    fn resolve_path(&self, path: &str) -> String {
        let mut current = path.to_owned();
        let mut hops = 0usize;
        while !self.files.contains_key(&current) {
            let Some(next) = self.renames.get(&current) else {
                break;
            };
            current.clone_from(next);
            hops += 1;
            if hops > self.renames.len() {
                break;
            }
        }
        current
    }

    fn integrity(path: &str, from: Oid, to: Oid, err: &TreeError) -> StrataError {
        StrataError::Integrity {
            path: path.to_owned(),
            from_blob: from,
            to_blob: to,
            detail: err.to_string(),
        }
    }

    fn validate_if_debug(&self, path: &str, change: &TreeChange) -> Result<()> {
        if !self.debug {
            return Ok(());
        }
        if let Some(file) = self.files.get(path) {
            if let Err(err) = file.tree().validate(&self.arena) {
                tracing::error!(path, runs = ?file.tree().runs(&self.arena), "tree dump");
                return Err(Self::integrity(path, change.from_blob, change.to_blob, &err));
            }
        }
        Ok(())
    }

    fn handle_insert(
        &mut self,
        change: &TreeChange,
        status: Status,
        blobs: &BTreeMap<Oid, CachedBlob>,
        is_merge: bool,
    ) -> Result<()> {
        let path = change.to_path.as_str();
        let Some(lines) = blobs.get(&change.to_blob).and_then(|b| b.lines) else {
            if is_merge {
                self.merged_files.insert(path.to_owned(), false);
            }
            return Ok(()); // binary, silently skipped
        };
        if self.files.contains_key(path) {
            if is_merge {
                // An equivalent file already exists on a sibling branch.
                self.merged_files.insert(path.to_owned(), false);
                return Ok(());
            }
            return Err(StrataError::Integrity {
                path: path.to_owned(),
                from_blob: change.from_blob,
                to_blob: change.to_blob,
                detail: "inserted path is already tracked".to_owned(),
            });
        }

        let hist = &mut *self.shared.borrow_mut();
        let mut sink = make_sink(hist, Some(path), self.track_files, self.track_people);
        let file = File::new(&mut self.arena, change.to_blob, status, lines, &mut sink);
        drop(sink);
        self.files.insert(path.to_owned(), file);
        if is_merge {
            self.merged_files.insert(path.to_owned(), true);
        }
        self.validate_if_debug(path, change)
    }

    fn handle_delete(
        &mut self,
        change: &TreeChange,
        status: Status,
        blobs: &BTreeMap<Oid, CachedBlob>,
        is_merge: bool,
    ) -> Result<()> {
        let Some(lines) = blobs.get(&change.from_blob).and_then(|b| b.lines) else {
            if is_merge {
                self.merged_files.insert(change.from_path.clone(), false);
            }
            return Ok(());
        };
        let path = self.resolve_path(&change.from_path);
        let Some(mut file) = self.files.remove(&path) else {
            // Never tracked — the file entered history as binary.
            tracing::debug!(path = %path, "deletion of untracked file skipped");
            return Ok(());
        };

        {
            let hist = &mut *self.shared.borrow_mut();
            let mut sink = make_sink(hist, Some(path.as_str()), self.track_files, self.track_people);
            file.delete_all(&mut self.arena, status, lines, &mut sink)
                .map_err(|e| Self::integrity(&path, change.from_blob, change.to_blob, &e))?;
        }
        file.dispose(&mut self.arena);
        self.shared.borrow_mut().files.remove(&path);
        if is_merge {
            // Gone on this branch; drop it everywhere at the join.
            self.merged_files.insert(path, false);
        }
        Ok(())
    }

    fn handle_modify(
        &mut self,
        change: &TreeChange,
        status: Status,
        blobs: &BTreeMap<Oid, CachedBlob>,
        diffs: &BTreeMap<String, FileDiffData>,
        is_merge: bool,
    ) -> Result<()> {
        let old_binary = blobs.get(&change.from_blob).is_none_or(|b| b.lines.is_none());
        let new_binary = blobs.get(&change.to_blob).is_none_or(|b| b.lines.is_none());
        if old_binary || new_binary {
            if is_merge {
                self.merged_files.insert(change.to_path.clone(), false);
            }
            return Ok(());
        }

        let from = self.resolve_path(&change.from_path);
        if !self.files.contains_key(&from) {
            // The path was skipped earlier (binary ancestry or branch
            // inconsistency): treat the new content as an insertion.
            let as_insert = TreeChange::insert(change.to_path.clone(), change.to_blob);
            return self.handle_insert(&as_insert, status, blobs, is_merge);
        }

        if change.is_rename() || from != change.to_path {
            let file = self
                .files
                .remove(&from)
                .expect("presence checked above");
            self.files.insert(change.to_path.clone(), file);
            self.renames.insert(from.clone(), change.to_path.clone());
            if self.track_files {
                let hist = &mut *self.shared.borrow_mut();
                if let Some(old_hist) = hist.files.remove(&from) {
                    let target = hist.files.entry(change.to_path.clone()).or_default();
                    for (tick, row) in old_hist {
                        for (prev, delta) in row {
                            record(target, tick, prev, delta);
                        }
                    }
                }
            }
        }

        let path = change.to_path.as_str();
        let Some(diff) = diffs.get(path) else {
            return Err(StrataError::Integrity {
                path: path.to_owned(),
                from_blob: change.from_blob,
                to_blob: change.to_blob,
                detail: "modified file has no line diff".to_owned(),
            });
        };

        {
            let hist = &mut *self.shared.borrow_mut();
            let mut sink = make_sink(hist, Some(path), self.track_files, self.track_people);
            let file = self
                .files
                .get_mut(path)
                .expect("moved or present under to_path");
            file.apply_diff(&mut self.arena, status, diff, &mut sink)
                .map_err(|e| Self::integrity(path, change.from_blob, change.to_blob, &e))?;
            file.set_hash(change.to_blob);
        }
        if is_merge {
            self.merged_files.insert(path.to_owned(), true);
        }
        self.validate_if_debug(path, change)
    }

    fn finalize_result(&self) -> BurndownResult {
        let hist = self.shared.borrow();
        let (project, last_tick) =
            group_sparse_history(&hist.global, None, self.granularity, self.sampling);

        let mut files = BTreeMap::new();
        if self.track_files {
            for (path, sparse) in &hist.files {
                if !self.files.contains_key(path) {
                    continue;
                }
                let (dense, _) =
                    group_sparse_history(sparse, Some(last_tick), self.granularity, self.sampling);
                files.insert(path.clone(), dense);
            }
        }

        let mut people = Vec::new();
        let mut people_interaction = Vec::new();
        if self.track_people {
            let zero = SparseHistory::new();
            for sparse in &hist.people {
                let source = if sparse.is_empty() { &zero } else { sparse };
                let (dense, _) =
                    group_sparse_history(source, Some(last_tick), self.granularity, self.sampling);
                people.push(dense);
            }
            let columns = self.people.len() + 2;
            for row in &hist.matrix {
                let mut dense_row = vec![0i64; columns];
                for (&col_author, &value) in row {
                    let idx = if col_author == AUTHOR_SELF {
                        0
                    } else if col_author as usize >= self.people.len() {
                        1 // unknown authors, AUTHOR_MISSING included
                    } else {
                        2 + col_author as usize
                    };
                    dense_row[idx] += value;
                }
                people_interaction.push(dense_row);
            }
        }

        let mut files_ownership = BTreeMap::new();
        for (path, file) in &self.files {
            let mut owners: BTreeMap<i32, i64> = BTreeMap::new();
            for status in file.tree().flatten(&self.arena) {
                let author = status.author() as usize;
                let key = if author < self.people.len() {
                    i32::try_from(author).expect("author index fits i32")
                } else {
                    -1
                };
                *owners.entry(key).or_default() += 1;
            }
            files_ownership.insert(path.clone(), owners);
        }

        BurndownResult {
            granularity: self.granularity,
            sampling: self.sampling,
            tick_size_secs: self.tick_size_secs,
            first_tick_time: self.first_tick_time,
            last_tick,
            project,
            files,
            files_ownership,
            people_sequence: self.people.clone(),
            people,
            people_interaction,
        }
    }
}

impl PipelineItem for BurndownAnalysis {
    fn name(&self) -> &'static str {
        "burndown"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[
            DEPENDENCY_TICK,
            DEPENDENCY_AUTHOR,
            DEPENDENCY_TREE_CHANGES,
            DEPENDENCY_BLOB_CACHE,
            DEPENDENCY_FILE_DIFF,
        ]
    }

    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        self.granularity = facts.config.granularity;
        self.sampling = facts.config.sampling;
        self.track_files = facts.config.burndown_files;
        self.track_people = facts.config.burndown_people;
        self.debug = facts.config.burndown_debug;
        self.tick_size_secs = facts.config.tick_size_secs;
        self.hibernation_threshold = facts.config.hibernation_threshold;
        self.hibernation_to_disk = facts.config.hibernation_to_disk;
        self.hibernation_dir = facts.config.hibernation_dir.clone();
        self.repair_options();

        self.people = facts.people.clone();
        self.first_tick_time = facts
            .commits
            .iter()
            .map(|c| c.timestamp)
            .min()
            .unwrap_or(0);

        let count = self.people.len();
        let hist = &mut *self.shared.borrow_mut();
        hist.people = vec![SparseHistory::new(); count];
        hist.matrix = vec![BTreeMap::new(); count];
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        if self.arena.is_hibernated() {
            return Err(StrataError::Hibernated {
                item: "burndown".to_owned(),
            });
        }
        let is_merge = deps.is_merge()?;
        let tick64 = deps.tick()?;
        let tick = u32::try_from(tick64)
            .map_err(|_| StrataError::config(format!("tick {tick64} out of range")))?;
        let author = deps.author()?;

        let effective_tick = if is_merge {
            self.merge_state = Some((tick, author));
            self.merged_files.clear();
            MERGE_MARK
        } else {
            tick
        };
        let status = self.status_for(author, effective_tick);

        let changes = Rc::clone(deps.tree_changes()?);
        let blobs = Rc::clone(deps.blob_cache()?);
        let diffs = Rc::clone(deps.file_diffs()?);

        for change in changes.iter() {
            match change.action {
                strata_git::ChangeAction::Insert => {
                    self.handle_insert(change, status, &blobs, is_merge)?;
                }
                strata_git::ChangeAction::Delete => {
                    self.handle_delete(change, status, &blobs, is_merge)?;
                }
                strata_git::ChangeAction::Modify => {
                    self.handle_modify(change, status, &blobs, &diffs, is_merge)?;
                }
            }
        }
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| {
                let mut arena = NodeArena::new();
                let files = self
                    .files
                    .iter()
                    .map(|(path, file)| (path.clone(), file.clone_into(&self.arena, &mut arena)))
                    .collect();
                Box::new(Self {
                    granularity: self.granularity,
                    sampling: self.sampling,
                    track_files: self.track_files,
                    track_people: self.track_people,
                    debug: self.debug,
                    tick_size_secs: self.tick_size_secs,
                    first_tick_time: self.first_tick_time,
                    hibernation_threshold: self.hibernation_threshold,
                    hibernation_to_disk: self.hibernation_to_disk,
                    hibernation_dir: self.hibernation_dir.clone(),
                    people: self.people.clone(),
                    arena,
                    files,
                    renames: self.renames.clone(),
                    merged_files: BTreeMap::new(),
                    merge_state: None,
                    shared: Rc::clone(&self.shared),
                }) as Box<dyn PipelineItem>
            })
            .collect()
    }

    fn merge(&mut self, siblings: Vec<Box<dyn PipelineItem>>) -> Result<()> {
        let mut replicas: Vec<Self> = Vec::with_capacity(siblings.len());
        for sibling in siblings {
            let replica = sibling
                .into_any()
                .downcast::<Self>()
                .map_err(|_| StrataError::config("burndown merged with a foreign item"))?;
            replicas.push(*replica);
        }

        let (merge_tick, _) = self.merge_state.take().ok_or_else(|| {
            StrataError::config("burndown merge without a consumed merge commit")
        })?;

        // Paths any replica flagged unmergeable disappear everywhere,
        // without history bookings.
        let mut dropped: BTreeSet<String> = BTreeSet::new();
        for (path, ok) in &self.merged_files {
            if !ok {
                dropped.insert(path.clone());
            }
        }
        for replica in &replicas {
            for (path, ok) in &replica.merged_files {
                if !ok {
                    dropped.insert(path.clone());
                }
            }
        }
        for path in &dropped {
            if let Some(mut file) = self.files.remove(path) {
                file.dispose(&mut self.arena);
            }
            self.shared.borrow_mut().files.remove(path);
        }

        for (path, file) in &mut self.files {
            let others: Vec<(Oid, Vec<Status>)> = replicas
                .iter()
                .filter_map(|replica| {
                    replica
                        .files
                        .get(path)
                        .map(|f| (f.hash(), f.tree().flatten(&replica.arena)))
                })
                .collect();
            if others.is_empty() {
                continue; // missing counterpart (binary policy), keep ours
            }
            let hist = &mut *self.shared.borrow_mut();
            let mut sink = make_sink(hist, Some(path.as_str()), self.track_files, self.track_people);
            file.merge(&mut self.arena, merge_tick, &others, &mut sink)
                .map_err(|e| Self::integrity(path, Oid::ZERO, file.hash(), &e))?;
        }

        // Adopt files only the siblings track (branch-local creations whose
        // counterpart never appeared in our diff).
        for replica in &replicas {
            for (path, file) in &replica.files {
                if dropped.contains(path) || self.files.contains_key(path) {
                    continue;
                }
                self.files
                    .insert(path.clone(), file.clone_into(&replica.arena, &mut self.arena));
            }
            self.renames
                .extend(replica.renames.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        self.merged_files.clear();
        Ok(())
    }

    fn hibernate(&mut self) -> Result<()> {
        if self.hibernation_threshold == 0 || self.arena.size() < self.hibernation_threshold {
            return Ok(());
        }
        let dir = self
            .hibernation_to_disk
            .then(|| self.hibernation_dir.clone());
        self.arena.hibernate(dir.as_deref())
    }

    fn boot(&mut self) -> Result<()> {
        self.arena.boot()
    }

    fn finalize(&mut self) -> Result<Option<Report>> {
        Ok(Some(Report::Burndown(self.finalize_result())))
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
