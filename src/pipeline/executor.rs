//! The branch-aware executor: linearize the commit DAG into a plan and drive
//! every item replica through it.
//!
//! The plan is a flat action list derived from the DAG in one pass:
//!
//! - a commit with one parent is consumed on its parent's branch;
//! - a commit with several children is followed by a `Fork` handing each
//!   child its own branch (and its own item replicas);
//! - a merge commit is consumed once per parent branch — each replica diffs
//!   against its own head — and then a `Merge` collapses the replicas into
//!   the first-parent branch;
//! - long branch-idle gaps get `Hibernate`/`Boot` bracketing so a waiting
//!   branch's arenas can be spilled.
//!
//! Within one commit, items run sequentially in topological order, piping
//! outputs through the [`Deps`] bag.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use strata_git::{CommitNode, HistoryRepo, Oid};

use crate::error::{Result, StrataError};
use crate::pipeline::{
    DEPENDENCY_COMMIT, DEPENDENCY_IS_MERGE, DEPENDENCY_MERGE_PRIMARY, Deps, Fact, Facts,
    PipelineItem, Report,
};

/// Actions below this many plan steps apart do not justify a hibernation
/// round-trip.
const HIBERNATE_GAP: usize = 32;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One step of the linearized plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Run `consume` for the commit at `commit` (index into the commit list)
    /// on `branch`. `primary` is false only on the non-first-parent replicas
    /// of a merge commit.
    Consume {
        /// Index into the topologically sorted commit list.
        commit: usize,
        /// Owning branch.
        branch: usize,
        /// Whether the commit has several parents.
        is_merge: bool,
        /// Whether this is the first-parent replica.
        primary: bool,
    },
    /// Split `branch` into `children` (the first id is the branch itself).
    Fork {
        /// The branch being split.
        branch: usize,
        /// Branch ids after the split, first-parent first.
        children: Vec<usize>,
    },
    /// Collapse `sources` into `target`.
    Merge {
        /// The surviving branch.
        target: usize,
        /// The branches merged away.
        sources: Vec<usize>,
    },
    /// Offer the branch's items a chance to spill state.
    Hibernate {
        /// The idle branch.
        branch: usize,
    },
    /// Reload spilled state before the branch runs again.
    Boot {
        /// The branch about to run.
        branch: usize,
    },
}

/// Build the action plan for a topologically sorted commit list.
///
/// # Errors
///
/// [`StrataError::Configuration`] when the list is not topologically sorted
/// (a commit appears before one of its parents).
pub fn build_plan(commits: &[CommitNode]) -> Result<Vec<Action>> {
    let mut children_count: HashMap<Oid, usize> = HashMap::new();
    for commit in commits {
        for parent in &commit.parents {
            *children_count.entry(*parent).or_insert(0) += 1;
        }
    }

    let roots = commits.iter().filter(|c| c.parents.is_empty()).count();
    let mut actions = Vec::new();
    let mut next_branch = 0usize;
    let mut root_branches: Vec<usize> = Vec::new();
    if roots > 1 {
        // Disconnected roots: split the pristine initial state up front.
        root_branches = (0..roots).collect();
        next_branch = roots;
        actions.push(Action::Fork {
            branch: 0,
            children: root_branches.clone(),
        });
        root_branches.reverse(); // consumed back-to-front below
    }

    // Branch ids available to the children of each consumed commit.
    let mut avail: HashMap<Oid, Vec<usize>> = HashMap::new();
    let take = |avail: &mut HashMap<Oid, Vec<usize>>, parent: &Oid| -> Result<usize> {
        let slots = avail.get_mut(parent).ok_or_else(|| {
            StrataError::config(format!(
                "commit list is not topologically sorted: parent {parent} not yet consumed"
            ))
        })?;
        slots.pop().ok_or_else(|| {
            StrataError::config(format!("more children than forks planned for {parent}"))
        })
    };

    for (idx, commit) in commits.iter().enumerate() {
        let branch = match commit.parents.len() {
            0 => {
                if roots > 1 {
                    root_branches.pop().expect("one branch per root")
                } else {
                    let b = next_branch;
                    next_branch += 1;
                    b
                }
            }
            1 => {
                let b = take(&mut avail, &commit.parents[0])?;
                actions.push(Action::Consume {
                    commit: idx,
                    branch: b,
                    is_merge: false,
                    primary: true,
                });
                b
            }
            _ => {
                let mut branches = Vec::with_capacity(commit.parents.len());
                for parent in &commit.parents {
                    branches.push(take(&mut avail, parent)?);
                }
                for (i, &b) in branches.iter().enumerate() {
                    actions.push(Action::Consume {
                        commit: idx,
                        branch: b,
                        is_merge: true,
                        primary: i == 0,
                    });
                }
                actions.push(Action::Merge {
                    target: branches[0],
                    sources: branches[1..].to_vec(),
                });
                branches[0]
            }
        };
        if commit.parents.is_empty() {
            actions.push(Action::Consume {
                commit: idx,
                branch,
                is_merge: false,
                primary: true,
            });
        }

        let n = children_count.get(&commit.id).copied().unwrap_or(0);
        if n > 1 {
            let mut kids = vec![branch];
            for _ in 1..n {
                kids.push(next_branch);
                next_branch += 1;
            }
            actions.push(Action::Fork {
                branch,
                children: kids.clone(),
            });
            kids.reverse(); // pop() hands the first-parent branch to the first child
            avail.insert(commit.id, kids);
        } else {
            avail.insert(commit.id, vec![branch]);
        }
    }

    Ok(insert_hibernations(actions))
}

/// Bracket long branch-idle gaps with Hibernate/Boot pairs. Whether a branch
/// actually spills is the item's runtime decision (arena-size threshold).
fn insert_hibernations(actions: Vec<Action>) -> Vec<Action> {
    let mut last_use: BTreeMap<usize, usize> = BTreeMap::new();
    let mut inserts: Vec<(usize, Action)> = Vec::new();

    for (pos, action) in actions.iter().enumerate() {
        let touched: Vec<usize> = match action {
            Action::Consume { branch, .. } => vec![*branch],
            Action::Fork { branch, children } => {
                let mut v = vec![*branch];
                v.extend(children.iter().copied());
                v
            }
            Action::Merge { target, sources } => {
                let mut v = vec![*target];
                v.extend(sources.iter().copied());
                v
            }
            Action::Hibernate { branch } | Action::Boot { branch } => vec![*branch],
        };
        for branch in touched {
            if let Some(&prev) = last_use.get(&branch) {
                if pos - prev > HIBERNATE_GAP {
                    inserts.push((prev + 1, Action::Hibernate { branch }));
                    inserts.push((pos, Action::Boot { branch }));
                }
            }
            last_use.insert(branch, pos);
        }
    }

    if inserts.is_empty() {
        return actions;
    }
    // Splice back-to-front so earlier positions stay valid.
    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    let mut actions = actions;
    for (pos, action) in inserts {
        actions.insert(pos, action);
    }
    actions
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Configure, plan, and run `items` over `commits`, returning each leaf's
/// finalized report in item order.
///
/// # Errors
///
/// Fatal item errors, plan errors, and configuration errors abort the run
/// with no partial result.
pub fn run(
    repo: &Rc<dyn HistoryRepo>,
    commits: &[Rc<CommitNode>],
    mut items: Vec<Box<dyn PipelineItem>>,
    facts: &mut Facts,
) -> Result<Vec<(String, Report)>> {
    for item in &mut items {
        item.configure(facts)?;
    }
    for item in &mut items {
        item.initialize(repo)?;
    }

    let plain: Vec<CommitNode> = commits.iter().map(|c| (**c).clone()).collect();
    let plan = build_plan(&plain)?;
    tracing::debug!(commits = commits.len(), actions = plan.len(), "plan built");

    let mut branches: BTreeMap<usize, Vec<Box<dyn PipelineItem>>> = BTreeMap::new();
    branches.insert(0, items);

    for action in plan {
        match action {
            Action::Consume {
                commit,
                branch,
                is_merge,
                primary,
            } => {
                let node = &commits[commit];
                let mut deps = Deps::new();
                deps.insert(DEPENDENCY_COMMIT, Fact::Commit(Rc::clone(node)));
                deps.insert(DEPENDENCY_IS_MERGE, Fact::Bool(is_merge));
                deps.insert(DEPENDENCY_MERGE_PRIMARY, Fact::Bool(primary));

                let set = branch_mut(&mut branches, branch)?;
                for item in set.iter_mut() {
                    if let Err(err) = item.consume(&mut deps) {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        tracing::warn!(
                            item = item.name(),
                            commit = %node.id,
                            error = %err,
                            "commit skipped on this branch"
                        );
                        break;
                    }
                }
            }
            Action::Fork { branch, children } => {
                let set = branches.remove(&branch).ok_or_else(|| unknown_branch(branch))?;
                let n = children.len();
                let mut sets: Vec<Vec<Box<dyn PipelineItem>>> =
                    (0..n).map(|_| Vec::new()).collect();
                for item in set {
                    let name = item.name();
                    let replicas = item.fork(n);
                    if replicas.len() != n {
                        return Err(StrataError::config(format!(
                            "item '{name}' forked into {} replicas instead of {n}",
                            replicas.len()
                        )));
                    }
                    for (slot, replica) in replicas.into_iter().enumerate() {
                        sets[slot].push(replica);
                    }
                }
                for (id, set) in children.into_iter().zip(sets) {
                    branches.insert(id, set);
                }
            }
            Action::Merge { target, sources } => {
                let mut sibling_sets = Vec::with_capacity(sources.len());
                for source in sources {
                    sibling_sets
                        .push(branches.remove(&source).ok_or_else(|| unknown_branch(source))?);
                }
                let set = branch_mut(&mut branches, target)?;
                let mut per_item: Vec<Vec<Box<dyn PipelineItem>>> =
                    (0..set.len()).map(|_| Vec::new()).collect();
                for siblings in sibling_sets {
                    for (slot, item) in siblings.into_iter().enumerate() {
                        per_item[slot].push(item);
                    }
                }
                for (item, siblings) in set.iter_mut().zip(per_item) {
                    item.merge(siblings)?;
                }
            }
            Action::Hibernate { branch } => {
                for item in branch_mut(&mut branches, branch)? {
                    item.hibernate()?;
                }
            }
            Action::Boot { branch } => {
                for item in branch_mut(&mut branches, branch)? {
                    item.boot()?;
                }
            }
        }
    }

    // A DAG walked from a single head collapses to one branch; with
    // disconnected roots the lowest surviving branch is the mainline.
    let mut surviving = branches.into_iter();
    let (_, mut finals) = surviving
        .next()
        .ok_or_else(|| StrataError::config("no branch survived the run"))?;

    let mut reports = Vec::new();
    for item in &mut finals {
        if let Some(report) = item.finalize()? {
            reports.push((item.name().to_owned(), report));
        }
    }
    Ok(reports)
}

fn branch_mut(
    branches: &mut BTreeMap<usize, Vec<Box<dyn PipelineItem>>>,
    branch: usize,
) -> Result<&mut Vec<Box<dyn PipelineItem>>> {
    branches
        .get_mut(&branch)
        .ok_or_else(|| unknown_branch(branch))
}

fn unknown_branch(branch: usize) -> StrataError {
    StrataError::config(format!("plan refers to unknown branch {branch}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::cell::RefCell;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes([b; 20])
    }

    fn node(id: u8, parents: &[u8], ts: i64) -> CommitNode {
        CommitNode {
            id: oid(id),
            parents: parents.iter().map(|&p| oid(p)).collect(),
            author_name: "a".to_owned(),
            author_email: "a@example.com".to_owned(),
            timestamp: ts,
        }
    }

    // -- build_plan --

    #[test]
    fn linear_history_single_branch() {
        let commits = vec![node(1, &[], 1), node(2, &[1], 2), node(3, &[2], 3)];
        let plan = build_plan(&commits).unwrap();
        assert_eq!(
            plan,
            vec![
                Action::Consume { commit: 0, branch: 0, is_merge: false, primary: true },
                Action::Consume { commit: 1, branch: 0, is_merge: false, primary: true },
                Action::Consume { commit: 2, branch: 0, is_merge: false, primary: true },
            ]
        );
    }

    #[test]
    fn fork_and_merge_shape() {
        // 1 -> {2, 3} -> 4 (merge, parents [2, 3])
        let commits = vec![
            node(1, &[], 1),
            node(2, &[1], 2),
            node(3, &[1], 3),
            node(4, &[2, 3], 4),
        ];
        let plan = build_plan(&commits).unwrap();
        assert_eq!(
            plan,
            vec![
                Action::Consume { commit: 0, branch: 0, is_merge: false, primary: true },
                Action::Fork { branch: 0, children: vec![0, 1] },
                Action::Consume { commit: 1, branch: 0, is_merge: false, primary: true },
                Action::Consume { commit: 2, branch: 1, is_merge: false, primary: true },
                Action::Consume { commit: 3, branch: 0, is_merge: true, primary: true },
                Action::Consume { commit: 3, branch: 1, is_merge: true, primary: false },
                Action::Merge { target: 0, sources: vec![1] },
            ]
        );
    }

    #[test]
    fn merge_parent_order_follows_commit_parents() {
        // Same DAG but the merge lists parent 3 first: its branch must be
        // the primary replica and the merge target.
        let commits = vec![
            node(1, &[], 1),
            node(2, &[1], 2),
            node(3, &[1], 3),
            node(4, &[3, 2], 4),
        ];
        let plan = build_plan(&commits).unwrap();
        let merge = plan
            .iter()
            .find(|a| matches!(a, Action::Merge { .. }))
            .unwrap();
        assert_eq!(merge, &Action::Merge { target: 1, sources: vec![0] });
    }

    #[test]
    fn unsorted_input_is_config_error() {
        let commits = vec![node(2, &[1], 2), node(1, &[], 1)];
        let err = build_plan(&commits).unwrap_err();
        assert!(matches!(err, StrataError::Configuration { .. }));
    }

    #[test]
    fn disconnected_roots_fork_pristine_state() {
        let commits = vec![node(1, &[], 1), node(2, &[], 2)];
        let plan = build_plan(&commits).unwrap();
        assert_eq!(plan[0], Action::Fork { branch: 0, children: vec![0, 1] });
        assert!(matches!(plan[1], Action::Consume { branch: 0, .. }));
        assert!(matches!(plan[2], Action::Consume { branch: 1, .. }));
    }

    #[test]
    fn long_gap_gets_hibernation_brackets() {
        // Branch 1 idles while branch 0 consumes a long chain.
        let mut commits = vec![node(1, &[], 1), node(2, &[1], 2), node(3, &[1], 3)];
        let mut prev = 2u8;
        for id in 10..60u8 {
            commits.push(node(id, &[prev], i64::from(id)));
            prev = id;
        }
        commits.push(node(100, &[prev, 3], 200));
        let plan = build_plan(&commits).unwrap();
        let hibernates = plan
            .iter()
            .filter(|a| matches!(a, Action::Hibernate { branch: 1 }))
            .count();
        let boots = plan
            .iter()
            .filter(|a| matches!(a, Action::Boot { branch: 1 }))
            .count();
        assert_eq!(hibernates, 1);
        assert_eq!(boots, 1);
        // The boot comes before branch 1's merge-commit consume.
        let boot_pos = plan
            .iter()
            .position(|a| matches!(a, Action::Boot { branch: 1 }))
            .unwrap();
        let consume_pos = plan
            .iter()
            .position(
                |a| matches!(a, Action::Consume { branch: 1, is_merge: true, .. }),
            )
            .unwrap();
        assert!(boot_pos < consume_pos);
    }

    // -- run: ordering and fork/merge counting with a probe item --

    #[derive(Default)]
    struct Log {
        consumed: Vec<(Oid, usize)>, // (commit, replica tag)
        forks: usize,
        merges: usize,
    }

    struct Probe {
        tag: usize,
        next_tag: Rc<RefCell<usize>>,
        log: Rc<RefCell<Log>>,
    }

    impl Probe {
        fn new(log: Rc<RefCell<Log>>) -> Self {
            Self {
                tag: 0,
                next_tag: Rc::new(RefCell::new(1)),
                log,
            }
        }
    }

    impl PipelineItem for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn consume(&mut self, deps: &mut Deps) -> Result<()> {
            let commit = deps.commit()?.id;
            self.log.borrow_mut().consumed.push((commit, self.tag));
            Ok(())
        }
        fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
            self.log.borrow_mut().forks += 1;
            (0..n)
                .map(|i| {
                    let tag = if i == 0 {
                        self.tag
                    } else {
                        let mut next = self.next_tag.borrow_mut();
                        let t = *next;
                        *next += 1;
                        t
                    };
                    Box::new(Self {
                        tag,
                        next_tag: Rc::clone(&self.next_tag),
                        log: Rc::clone(&self.log),
                    }) as Box<dyn PipelineItem>
                })
                .collect()
        }
        fn merge(&mut self, siblings: Vec<Box<dyn PipelineItem>>) -> Result<()> {
            self.log.borrow_mut().merges += siblings.len();
            Ok(())
        }
        fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
            self
        }
    }

    struct FakeRepo;
    impl HistoryRepo for FakeRepo {
        fn load_history(
            &self,
            _head: Option<&str>,
        ) -> std::result::Result<Vec<CommitNode>, strata_git::GitError> {
            Ok(Vec::new())
        }
        fn diff_commits(
            &self,
            _old: Option<Oid>,
            _new: Oid,
        ) -> std::result::Result<Vec<strata_git::TreeChange>, strata_git::GitError> {
            Ok(Vec::new())
        }
        fn read_blob(&self, _oid: Oid) -> std::result::Result<Vec<u8>, strata_git::GitError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn run_consumes_merge_commit_on_every_parent_branch() {
        let commits: Vec<Rc<CommitNode>> = vec![
            Rc::new(node(1, &[], 1)),
            Rc::new(node(2, &[1], 2)),
            Rc::new(node(3, &[1], 3)),
            Rc::new(node(4, &[2, 3], 4)),
        ];
        let log = Rc::new(RefCell::new(Log::default()));
        let items: Vec<Box<dyn PipelineItem>> = vec![Box::new(Probe::new(Rc::clone(&log)))];
        let repo: Rc<dyn HistoryRepo> = Rc::new(FakeRepo);
        let mut facts = Facts::new(Config::default(), commits.clone());

        run(&repo, &commits, items, &mut facts).unwrap();

        let log = log.borrow();
        assert_eq!(log.forks, 1);
        assert_eq!(log.merges, 1);
        // The merge commit (4) was consumed once per parent replica.
        let merge_consumes = log
            .consumed
            .iter()
            .filter(|(c, _)| *c == oid(4))
            .count();
        assert_eq!(merge_consumes, 2);
        // Ancestor ordering per branch: 1 before 2, 2 before 4-on-mainline.
        let pos = |id: u8, tag: usize| {
            log.consumed
                .iter()
                .position(|&(c, t)| c == oid(id) && t == tag)
                .unwrap()
        };
        assert!(pos(1, 0) < pos(2, 0));
        assert!(pos(2, 0) < pos(4, 0));
        assert!(pos(3, 1) < pos(4, 1));
    }
}
