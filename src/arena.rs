//! The node arena backing every line-ownership tree of one analysis replica.
//!
//! All trees of a replica allocate their nodes here, which gives a single
//! contiguous allocation whose free-list is trivially snapshot-able: the
//! hibernation image is the node table plus the free-list head, nothing else.
//! Branch forks copy live nodes into the destination replica's own arena —
//! arenas are never shared across forks.
//!
//! Indices returned by [`NodeArena::alloc`] stay valid until freed, across
//! hibernate/boot cycles included, so trees can store bare `u32` links.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Index sentinel: "no node".
pub const NIL: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One run boundary of a line tree: a key (line index), a packed status
/// value, and intrusive links to the neighboring runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Line index where this run starts.
    pub key: u32,
    /// Packed [`Status`](crate::status::Status) raw word, or
    /// [`TREE_END`](crate::status::TREE_END) on a tail node.
    pub value: u32,
    /// Previous run boundary, [`NIL`] on the first node.
    pub prev: u32,
    /// Next run boundary, [`NIL`] on the tail.
    pub next: u32,
}

impl Node {
    /// A node with no links yet.
    #[must_use]
    pub const fn detached(key: u32, value: u32) -> Self {
        Self {
            key,
            value,
            prev: NIL,
            next: NIL,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeArena
// ---------------------------------------------------------------------------

/// Where a hibernated arena keeps its image.
#[derive(Debug)]
enum Image {
    Memory(Vec<u8>),
    Disk(PathBuf),
}

/// Counter used to give each on-disk image a unique file name.
static IMAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A growable table of [`Node`]s with an intrusive free-list.
#[derive(Debug, Default)]
pub struct NodeArena {
    storage: Vec<Node>,
    free_head: u32,
    free_count: usize,
    image: Option<Image>,
}

impl NodeArena {
    /// An empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            free_head: NIL,
            free_count: 0,
            image: None,
        }
    }

    /// Number of live nodes.
    #[must_use]
    pub fn used(&self) -> usize {
        self.storage.len() - self.free_count
    }

    /// Total capacity, live and freed nodes together.
    #[must_use]
    pub fn size(&self) -> usize {
        self.storage.len()
    }

    /// `true` while the node table is spilled out.
    #[must_use]
    pub const fn is_hibernated(&self) -> bool {
        self.image.is_some()
    }

    /// Store `node`, reusing a freed slot when one exists.
    pub fn alloc(&mut self, node: Node) -> u32 {
        debug_assert!(!self.is_hibernated(), "alloc on a hibernated arena");
        if self.free_head == NIL {
            self.storage.push(node);
            u32::try_from(self.storage.len() - 1).expect("arena exceeds u32 indices")
        } else {
            let idx = self.free_head;
            self.free_head = self.storage[idx as usize].next;
            self.free_count -= 1;
            self.storage[idx as usize] = node;
            idx
        }
    }

    /// Return a node to the free-list.
    pub fn free(&mut self, idx: u32) {
        debug_assert!(!self.is_hibernated(), "free on a hibernated arena");
        self.storage[idx as usize] = Node {
            key: 0,
            value: 0,
            prev: NIL,
            next: self.free_head,
        };
        self.free_head = idx;
        self.free_count += 1;
    }

    /// Read a node.
    #[must_use]
    pub fn node(&self, idx: u32) -> &Node {
        &self.storage[idx as usize]
    }

    /// Mutate a node.
    pub fn node_mut(&mut self, idx: u32) -> &mut Node {
        &mut self.storage[idx as usize]
    }

    // -----------------------------------------------------------------------
    // Hibernation
    // -----------------------------------------------------------------------

    /// Snapshot the node table and release it. With `dir` the image is
    /// spilled to a fresh file in that directory, otherwise it stays in
    /// memory as a compact byte buffer.
    ///
    /// Only legal between `consume` calls; trees referencing this arena must
    /// not be touched until [`boot`](Self::boot).
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] when encoding or the spill write fails.
    pub fn hibernate(&mut self, dir: Option<&Path>) -> Result<(), StrataError> {
        if self.is_hibernated() {
            return Ok(());
        }
        let bytes = bincode::serialize(&(&self.storage, self.free_head, self.free_count))
            .map_err(|e| StrataError::Io {
                path: PathBuf::from("<arena image>"),
                source: std::io::Error::other(e),
            })?;

        let image = match dir {
            None => Image::Memory(bytes),
            Some(dir) => {
                let seq = IMAGE_SEQ.fetch_add(1, Ordering::Relaxed);
                let path = dir.join(format!("strata-arena-{seq}.bin"));
                let tmp = dir.join(format!(".strata-arena-{seq}.bin.tmp"));
                std::fs::create_dir_all(dir).map_err(|e| StrataError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
                std::fs::write(&tmp, &bytes).map_err(|e| StrataError::Io {
                    path: tmp.clone(),
                    source: e,
                })?;
                std::fs::rename(&tmp, &path).map_err(|e| StrataError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                Image::Disk(path)
            }
        };

        tracing::debug!(nodes = self.storage.len(), to_disk = dir.is_some(), "arena hibernated");
        self.storage = Vec::new();
        self.image = Some(image);
        Ok(())
    }

    /// Restore the node table from its hibernation image. Disk images are
    /// deleted after a successful read. No-op when not hibernated.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] when the image cannot be read or decoded.
    pub fn boot(&mut self) -> Result<(), StrataError> {
        let Some(image) = self.image.take() else {
            return Ok(());
        };
        let (bytes, origin) = match image {
            Image::Memory(bytes) => (bytes, None),
            Image::Disk(path) => {
                let bytes = std::fs::read(&path).map_err(|e| StrataError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                (bytes, Some(path))
            }
        };
        let (storage, free_head, free_count): (Vec<Node>, u32, usize) =
            bincode::deserialize(&bytes).map_err(|e| StrataError::Io {
                path: origin.clone().unwrap_or_else(|| PathBuf::from("<arena image>")),
                source: std::io::Error::other(e),
            })?;
        if let Some(path) = origin {
            // Best effort: a leftover image is harmless.
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove hibernation image");
            }
        }
        self.storage = storage;
        self.free_head = free_head;
        self.free_count = free_count;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- alloc / free --

    #[test]
    fn alloc_grows_and_reuses() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::detached(0, 1));
        let b = arena.alloc(Node::detached(5, 2));
        assert_eq!(arena.used(), 2);
        assert_eq!(arena.size(), 2);

        arena.free(a);
        assert_eq!(arena.used(), 1);
        assert_eq!(arena.size(), 2);

        // The freed slot is recycled before the table grows.
        let c = arena.alloc(Node::detached(9, 3));
        assert_eq!(c, a);
        assert_eq!(arena.size(), 2);
        assert_eq!(arena.node(b).key, 5);
        assert_eq!(arena.node(c).key, 9);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::detached(0, 0));
        let b = arena.alloc(Node::detached(1, 0));
        arena.free(a);
        arena.free(b);
        assert_eq!(arena.alloc(Node::detached(2, 0)), b);
        assert_eq!(arena.alloc(Node::detached(3, 0)), a);
    }

    // -- hibernation --

    #[test]
    fn hibernate_in_memory_roundtrip() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::detached(0, 10));
        let b = arena.alloc(Node::detached(4, 20));
        arena.free(a);

        arena.hibernate(None).unwrap();
        assert!(arena.is_hibernated());
        assert_eq!(arena.size(), 0);

        arena.boot().unwrap();
        assert!(!arena.is_hibernated());
        assert_eq!(arena.used(), 1);
        assert_eq!(arena.node(b).value, 20);
        // Free-list survived: the next alloc recycles `a`.
        assert_eq!(arena.alloc(Node::detached(7, 30)), a);
    }

    #[test]
    fn hibernate_to_disk_roundtrip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = NodeArena::new();
        let idx = arena.alloc(Node::detached(3, 42));

        arena.hibernate(Some(dir.path())).unwrap();
        let images: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(images.len(), 1);

        arena.boot().unwrap();
        assert_eq!(arena.node(idx).value, 42);
        // The image file is deleted after boot.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn hibernate_twice_is_noop() {
        let mut arena = NodeArena::new();
        arena.alloc(Node::detached(0, 1));
        arena.hibernate(None).unwrap();
        arena.hibernate(None).unwrap();
        arena.boot().unwrap();
        assert_eq!(arena.used(), 1);
    }

    #[test]
    fn boot_without_hibernate_is_noop() {
        let mut arena = NodeArena::new();
        arena.alloc(Node::detached(0, 1));
        arena.boot().unwrap();
        assert_eq!(arena.used(), 1);
    }
}
