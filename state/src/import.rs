//! Bulk import of an exported node sequence
//!
//! The importer is a stack machine: leaves are pushed, every inner node
//! pops its right then its left child. A well formed post-order sequence
//! leaves exactly one root on the stack.

use std::sync::Arc;
use tracing::debug;
use vellum_core::{Hash, SnapshotError, SnapshotResult, TreeVersion};

use crate::node::Node;
use crate::tree::MutableTree;

/// One node handed to the importer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportNode {
    /// Leaf key; ignored for inner nodes, whose key is re-derived
    pub key: Vec<u8>,
    /// Leaf value, `None` for inner nodes
    pub value: Option<Vec<u8>>,
    pub version: TreeVersion,
    pub node_height: i32,
}

impl From<crate::export::ExportNode> for ImportNode {
    fn from(node: crate::export::ExportNode) -> Self {
        Self {
            key: node.key,
            value: node.value,
            version: node.version,
            node_height: node.node_height,
        }
    }
}

/// Rebuilds a tree from a post-order node sequence
pub struct Importer<'a> {
    tree: &'a mut MutableTree,
    version: TreeVersion,
    stack: Vec<Arc<Node>>,
    added: usize,
}

impl<'a> Importer<'a> {
    /// Start importing `version` into `tree`, which must be empty
    pub fn new(tree: &'a mut MutableTree, version: TreeVersion) -> SnapshotResult<Self> {
        if !tree.is_empty() {
            return Err(SnapshotError::TreeNotEmpty);
        }
        Ok(Self {
            tree,
            version,
            stack: Vec::new(),
            added: 0,
        })
    }

    pub fn add(&mut self, node: ImportNode) -> SnapshotResult<()> {
        if node.node_height < 0 {
            return Err(malformed(format!("negative node height {}", node.node_height)));
        }

        if node.node_height == 0 {
            let value = node.value.ok_or_else(|| SnapshotError::MissingPayload {
                key: String::from_utf8_lossy(&node.key).into_owned(),
            })?;
            self.stack.push(Node::leaf(node.key, value, node.version));
            self.added += 1;
            return Ok(());
        }

        if node.value.is_some() {
            return Err(malformed("inner node carries a value"));
        }
        let (right, left) = match (self.stack.pop(), self.stack.pop()) {
            (Some(right), Some(left)) => (right, left),
            _ => return Err(malformed("inner node without two children")),
        };

        let height = 1 + left.height().max(right.height());
        if height != node.node_height {
            return Err(malformed(format!(
                "inner node height {} does not match children ({})",
                node.node_height, height
            )));
        }
        if left.rightmost_key() >= right.leftmost_key() {
            return Err(malformed("children out of key order"));
        }

        let key = right.leftmost_key().to_vec();
        self.stack.push(Node::inner(key, left, right, node.version));
        self.added += 1;
        Ok(())
    }

    /// Install the rebuilt tree as the import version
    pub fn commit(self) -> SnapshotResult<Hash> {
        let root = match (self.stack.len(), self.added) {
            (0, 0) => None,
            (1, _) => self.stack.into_iter().next(),
            (roots, _) => {
                return Err(SnapshotError::ImportCommitFailed {
                    reason: format!("{} unconnected subtrees left after {} nodes", roots, self.added),
                })
            }
        };

        self.tree.install(self.version, root);
        let hash = self.tree.working_hash();
        debug!("Imported tree version {} with root {}", self.version, hash);
        Ok(hash)
    }
}

fn malformed(reason: impl Into<String>) -> SnapshotError {
    SnapshotError::MalformedImport { reason: reason.into() }
}
