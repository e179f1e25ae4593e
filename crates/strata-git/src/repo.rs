//! The [`HistoryRepo`] trait — the abstraction boundary between strata and git.
//!
//! The analysis core interacts with git exclusively through this trait. It is
//! object-safe so the pipeline can hold `Rc<dyn HistoryRepo>` and tests can
//! substitute in-memory fakes.
//!
//! The method set is the minimal interface the replay core consumes:
//!
//! | Method          | Feeds                                        |
//! |-----------------|----------------------------------------------|
//! | `load_history`  | the executor's linearized commit plan        |
//! | `diff_commits`  | the tree-changes feeder item                 |
//! | `read_blob`     | the blob-cache feeder item                   |

use crate::error::GitError;
use crate::types::{CommitNode, Oid, TreeChange};

/// Read-only git history access used by the replay core.
///
/// Implementations may be backed by gix (the production backend) or a test
/// double. All methods are read-only; strata never writes to a repository.
pub trait HistoryRepo {
    /// Collect every commit reachable from `head` (a revision spec such as
    /// `"HEAD"` or a branch name; `None` means `HEAD`) and return them in
    /// topological order: parents strictly before children, author time as
    /// the tie-break between unrelated commits.
    ///
    /// The returned DAG is acyclic by construction and has a single sink
    /// (the head commit itself).
    ///
    /// # Errors
    ///
    /// Returns [`GitError`] if the spec does not resolve or the walk hits a
    /// corrupt object.
    fn load_history(&self, head: Option<&str>) -> Result<Vec<CommitNode>, GitError>;

    /// Diff the tree of `new` against the tree of `old` (or against the empty
    /// tree for root commits). Renames are reported as `Modify` changes with
    /// differing paths; non-blob entries (submodules, symlink targets kept as
    /// blobs aside) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GitError`] if either commit or tree cannot be read.
    fn diff_commits(&self, old: Option<Oid>, new: Oid) -> Result<Vec<TreeChange>, GitError>;

    /// Read the raw bytes of a blob.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::NotFound`] if the blob does not exist.
    fn read_blob(&self, oid: Oid) -> Result<Vec<u8>, GitError>;
}
