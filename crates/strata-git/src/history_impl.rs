//! gix-backed commit collection and topological ordering.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::from_gix_oid;
use crate::types::{CommitNode, Oid};

pub fn load_history(repo: &GixRepo, head: Option<&str>) -> Result<Vec<CommitNode>, GitError> {
    let spec = head.unwrap_or("HEAD");
    let head_id = repo
        .repo
        .rev_parse_single(spec)
        .map_err(|e| GitError::NotFound {
            message: format!("revision '{spec}': {e}"),
        })?;

    let head_commit = repo
        .repo
        .find_commit(head_id.detach())
        .map_err(|e| GitError::NotFound {
            message: format!("commit {head_id}: {e}"),
        })?;

    let walk = head_commit
        .ancestors()
        .all()
        .map_err(|e| GitError::Traversal {
            message: e.to_string(),
        })?;

    let mut nodes = Vec::new();
    for info in walk {
        let info = info.map_err(|e| GitError::Traversal {
            message: e.to_string(),
        })?;
        nodes.push(read_node(repo, from_gix_oid(info.id))?);
    }

    tracing::debug!(commits = nodes.len(), head = %head_id, "collected history");
    Ok(topo_sort(nodes))
}

fn read_node(repo: &GixRepo, oid: Oid) -> Result<CommitNode, GitError> {
    let commit = repo
        .repo
        .find_commit(crate::objects_impl::to_gix_oid(oid))
        .map_err(|e| GitError::NotFound {
            message: format!("commit {oid}: {e}"),
        })?;

    let decoded = commit.decode().map_err(|e| GitError::Backend {
        message: format!("failed to decode commit {oid}: {e}"),
    })?;

    let parents = decoded.parents().map(from_gix_oid).collect();
    let author = decoded.author();
    let timestamp = author.time().map(|t| t.seconds).unwrap_or_default();

    Ok(CommitNode {
        id: oid,
        parents,
        author_name: author.name.to_string(),
        author_email: author.email.to_string(),
        timestamp,
    })
}

/// Order commits parents-before-children; among ready commits the earliest
/// author time (then lowest OID) goes first, so linear histories come out in
/// chronological order and the result is deterministic on any DAG.
fn topo_sort(nodes: Vec<CommitNode>) -> Vec<CommitNode> {
    let mut by_id: HashMap<Oid, CommitNode> = HashMap::with_capacity(nodes.len());
    let mut children: HashMap<Oid, Vec<Oid>> = HashMap::new();
    let mut pending: HashMap<Oid, usize> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        for parent in &node.parents {
            children.entry(*parent).or_default().push(node.id);
        }
        pending.insert(node.id, node.parents.len());
        by_id.insert(node.id, node);
    }

    let mut ready: BinaryHeap<Reverse<(i64, Oid)>> = by_id
        .values()
        .filter(|n| n.parents.is_empty())
        .map(|n| Reverse((n.timestamp, n.id)))
        .collect();

    let mut sorted = Vec::with_capacity(by_id.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        for child in children.remove(&id).unwrap_or_default() {
            let left = pending
                .get_mut(&child)
                .expect("child commit is in the walked set");
            *left -= 1;
            if *left == 0 {
                let node = &by_id[&child];
                ready.push(Reverse((node.timestamp, node.id)));
            }
        }
        if let Some(node) = by_id.remove(&id) {
            sorted.push(node);
        }
    }

    sorted
}
