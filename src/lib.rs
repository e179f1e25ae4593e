//! strata — longitudinal git history analysis.
//!
//! Strata replays a repository's commit DAG through a dependency-ordered
//! pipeline and computes line-survival ("burndown"), coupling, and
//! per-developer statistics. The interesting machinery lives in four layers,
//! leaves first:
//!
//! - [`tree`] / [`arena`]: the run-length line-ownership map and the node
//!   arena it allocates from;
//! - [`file`]: the per-file engine folding line diffs into tree updates;
//! - [`burndown`] (plus [`couples`], [`devs`], [`commits`]): the leaf
//!   analyses;
//! - [`pipeline`] / [`items`]: the item contract, the planner, the
//!   branch-aware executor, and the feeder items.
//!
//! Repository access goes exclusively through the `strata-git` crate's
//! `HistoryRepo` trait; [`driver::run_analyses`] wires everything together
//! for the CLI.

pub mod arena;
pub mod burndown;
pub mod commits;
pub mod config;
pub mod couples;
pub mod devs;
pub mod driver;
pub mod error;
pub mod file;
pub mod items;
pub mod output;
pub mod pipeline;
pub mod status;
pub mod tree;

pub use config::Config;
pub use error::{Result, StrataError};
