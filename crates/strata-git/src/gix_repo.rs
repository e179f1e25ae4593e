//! The gix-backed implementation of [`HistoryRepo`].

use std::path::{Path, PathBuf};

use crate::error::GitError;
use crate::repo::HistoryRepo;
use crate::types::{CommitNode, Oid, TreeChange};

/// A [`HistoryRepo`] implementation backed by
/// [gix](https://github.com/GitoxideLabs/gitoxide).
///
/// Construct via [`GixRepo::open`] or [`GixRepo::open_at`].
pub struct GixRepo {
    pub(crate) repo: gix::Repository,
    pub(crate) workdir: Option<PathBuf>,
}

impl GixRepo {
    /// Open the git repository at or above `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::Backend`] if no repository is found.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = gix::open(path).map_err(|e| GitError::Backend {
            message: e.to_string(),
        })?;
        let workdir = repo.workdir().map(Path::to_path_buf);
        Ok(Self { repo, workdir })
    }

    /// Open a git repository at exactly `path` (no parent discovery).
    ///
    /// # Errors
    ///
    /// Returns [`GitError::Backend`] if `path` is not a repository.
    pub fn open_at(path: &Path) -> Result<Self, GitError> {
        let repo = gix::open_opts(path, gix::open::Options::isolated()).map_err(|e| {
            GitError::Backend {
                message: e.to_string(),
            }
        })?;
        let workdir = repo.workdir().map(Path::to_path_buf);
        Ok(Self { repo, workdir })
    }

    /// The working directory of the repository, if it has one.
    #[must_use]
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }
}

impl HistoryRepo for GixRepo {
    fn load_history(&self, head: Option<&str>) -> Result<Vec<CommitNode>, GitError> {
        crate::history_impl::load_history(self, head)
    }

    fn diff_commits(&self, old: Option<Oid>, new: Oid) -> Result<Vec<TreeChange>, GitError> {
        crate::diff_impl::diff_commits(self, old, new)
    }

    fn read_blob(&self, oid: Oid) -> Result<Vec<u8>, GitError> {
        crate::objects_impl::read_blob(self, oid)
    }
}
