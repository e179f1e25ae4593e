//! Feeder items: the pipeline members that turn raw repository access into
//! the facts the leaf analyses consume.
//!
//! Each feeder is small and single-purpose: ticks, author identity, tree
//! changes, blob cache, file diffs, line stats. The planner pulls in only
//! the ones a requested analysis actually needs.

pub mod blob_cache;
pub mod file_diff;
pub mod identity;
pub mod line_stats;
pub mod ticks;
pub mod tree_changes;

pub use blob_cache::{BlobCacheItem, CachedBlob};
pub use file_diff::FileDiffItem;
pub use identity::IdentityItem;
pub use line_stats::{LineStats, LineStatsItem};
pub use ticks::TicksItem;
pub use tree_changes::TreeChangesItem;

use crate::pipeline::PipelineItem;

/// The full feeder pool, in registration order, for the planner to pick
/// from.
#[must_use]
pub fn all_feeders() -> Vec<Box<dyn PipelineItem>> {
    vec![
        Box::new(TicksItem::default()),
        Box::new(IdentityItem::default()),
        Box::new(TreeChangesItem::default()),
        Box::new(BlobCacheItem::default()),
        Box::new(FileDiffItem::default()),
        Box::new(LineStatsItem::default()),
    ]
}
