//! Git history access layer for strata.
//!
//! This crate defines the [`HistoryRepo`] trait — the single interface through
//! which the analysis core reads a repository. The core never imports gix (or
//! any other git library) directly; it depends on `strata-git` and programs
//! against the trait, which keeps the replay engine testable with in-memory
//! fakes.
//!
//! The surface is deliberately narrow. The replay core needs exactly four
//! things from git: the commit DAG, per-commit tree changes, blob bytes, and
//! author identification. Everything else (refs, worktrees, writes) is out of
//! scope — strata never mutates a repository.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`HistoryRepo`] trait definition.
//! - [`types`] — value types used in trait signatures ([`Oid`],
//!   [`CommitNode`], [`TreeChange`]).
//! - [`error`] — the [`GitError`] enum returned by all trait methods.
//! - [`gix_repo`] — the gix-backed implementation, [`GixRepo`].

pub mod error;
pub mod gix_repo;
pub mod repo;
pub mod types;

mod diff_impl;
mod history_impl;
mod objects_impl;

pub use error::GitError;
pub use gix_repo::GixRepo;
pub use repo::HistoryRepo;
pub use types::{ChangeAction, CommitNode, Oid, OidParseError, TreeChange};
