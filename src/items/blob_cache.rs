//! The blob cache: bytes and line counts for both sides of every change.
//!
//! Binary classification happens here, once per blob: a NUL byte within the
//! first 8 KiB marks the blob binary and its line count absent. Downstream
//! consumers treat an absent count as "skip this change silently".

use std::collections::BTreeMap;
use std::rc::Rc;

use strata_git::{HistoryRepo, Oid};

use crate::error::Result;
use crate::pipeline::{
    DEPENDENCY_BLOB_CACHE, DEPENDENCY_TREE_CHANGES, Deps, Fact, PipelineItem,
};

/// How far into a blob the binary sniff looks.
const BINARY_SNIFF_WINDOW: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// CachedBlob
// ---------------------------------------------------------------------------

/// A blob's bytes plus its line count; `lines` is `None` for binary blobs.
#[derive(Clone, Debug)]
pub struct CachedBlob {
    /// Raw blob bytes.
    pub data: Rc<Vec<u8>>,
    /// Line count, absent when the blob is binary.
    pub lines: Option<u32>,
}

/// Count the lines of a text blob, or `None` when the first 8 KiB contain a
/// NUL byte. A trailing line without a newline still counts.
#[must_use]
pub fn count_lines(data: &[u8]) -> Option<u32> {
    let window = &data[..data.len().min(BINARY_SNIFF_WINDOW)];
    if window.contains(&0) {
        return None;
    }
    let mut lines = u32::try_from(data.iter().filter(|&&b| b == b'\n').count())
        .expect("line count fits u32");
    if data.last().is_some_and(|&b| b != b'\n') {
        lines += 1;
    }
    Some(lines)
}

// ---------------------------------------------------------------------------
// BlobCacheItem
// ---------------------------------------------------------------------------

/// Provides [`DEPENDENCY_BLOB_CACHE`]: every blob referenced by this
/// commit's tree changes, loaded and classified.
#[derive(Clone, Default)]
pub struct BlobCacheItem {
    repo: Option<Rc<dyn HistoryRepo>>,
}

impl PipelineItem for BlobCacheItem {
    fn name(&self) -> &'static str {
        "blob_cache"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_BLOB_CACHE]
    }

    fn requires(&self) -> &'static [&'static str] {
        &[DEPENDENCY_TREE_CHANGES]
    }

    fn initialize(&mut self, repo: &Rc<dyn HistoryRepo>) -> Result<()> {
        self.repo = Some(Rc::clone(repo));
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| crate::error::StrataError::config("blob_cache not initialized"))?;
        let changes = Rc::clone(deps.tree_changes()?);

        let mut cache: BTreeMap<Oid, CachedBlob> = BTreeMap::new();
        for change in changes.iter() {
            for oid in [change.from_blob, change.to_blob] {
                if oid.is_zero() || cache.contains_key(&oid) {
                    continue;
                }
                let data = repo.read_blob(oid)?;
                let lines = count_lines(&data);
                cache.insert(
                    oid,
                    CachedBlob {
                        data: Rc::new(data),
                        lines,
                    },
                );
            }
        }
        deps.insert(DEPENDENCY_BLOB_CACHE, Fact::BlobCache(Rc::new(cache)));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| Box::new(self.as_ref().clone()) as Box<dyn PipelineItem>)
            .collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
