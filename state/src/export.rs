//! Deterministic tree export
//!
//! Nodes come out depth-first in post-order (left subtree, right subtree,
//! then the node itself). Replaying that sequence through the importer
//! rebuilds the exact same shape.

use std::sync::Arc;
use vellum_core::{Hash, SnapshotError, SnapshotResult, TreeVersion};

use crate::node::Node;

/// One exported node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNode {
    /// Leaf key, or the inner node's routing key
    pub key: Vec<u8>,
    /// Leaf value, `None` for inner nodes
    pub value: Option<Vec<u8>>,
    pub version: TreeVersion,
    /// Height of the node inside the tree, 0 for leaves
    pub node_height: i32,
    pub hash: Hash,
}

impl ExportNode {
    pub fn is_leaf(&self) -> bool {
        self.value.is_some()
    }
}

/// Post-order iterator over every node of a saved tree version
pub struct Exporter {
    stack: Vec<(Arc<Node>, bool)>,
    expected: usize,
    exported: usize,
}

impl Exporter {
    pub(crate) fn new(root: Option<Arc<Node>>, expected: usize) -> Self {
        Self {
            stack: root.into_iter().map(|node| (node, false)).collect(),
            expected,
            exported: 0,
        }
    }

    /// Number of nodes a complete export yields
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn exported(&self) -> usize {
        self.exported
    }

    /// Next node in export order, `None` once the traversal is done
    pub fn next_node(&mut self) -> Option<ExportNode> {
        while let Some((node, expanded)) = self.stack.pop() {
            match node.children() {
                Some((left, right)) if !expanded => {
                    let (left, right) = (left.clone(), right.clone());
                    self.stack.push((node, true));
                    self.stack.push((right, false));
                    self.stack.push((left, false));
                }
                _ => {
                    self.exported += 1;
                    return Some(ExportNode {
                        key: node.key().to_vec(),
                        value: node.value().map(|v| v.to_vec()),
                        version: node.version(),
                        node_height: node.height(),
                        hash: node.hash(),
                    });
                }
            }
        }
        None
    }

    /// Check the traversal reached its end marker
    pub fn finish(self) -> SnapshotResult<()> {
        if self.exported < self.expected || !self.stack.is_empty() {
            return Err(SnapshotError::ExportIncomplete {
                expected: self.expected,
                exported: self.exported,
            });
        }
        Ok(())
    }
}

impl Iterator for Exporter {
    type Item = ExportNode;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_node()
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::MutableTree;
    use vellum_core::SnapshotError;

    #[test]
    fn test_export_is_post_order() {
        let mut tree = MutableTree::new();
        tree.set(b"a", b"1".to_vec());
        tree.set(b"b", b"2".to_vec());
        tree.set(b"c", b"3".to_vec());
        tree.save_version();

        let nodes: Vec<_> = tree.latest().unwrap().export().collect();
        assert_eq!(nodes.len(), 5);
        // root comes last
        assert_eq!(nodes[4].hash, tree.working_hash());
        assert!(nodes[0].is_leaf());
        assert_eq!(nodes[0].key, b"a".to_vec());
        let leaves: Vec<_> = nodes.iter().filter(|n| n.is_leaf()).map(|n| n.key.clone()).collect();
        assert_eq!(leaves, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_export_empty_tree() {
        let mut tree = MutableTree::new();
        tree.save_version();
        let mut exporter = tree.latest().unwrap().export();
        assert!(exporter.next_node().is_none());
        assert!(exporter.finish().is_ok());
    }

    #[test]
    fn test_abandoned_export_is_incomplete() {
        let mut tree = MutableTree::new();
        for i in 0..8u8 {
            tree.set(&[i], vec![i]);
        }
        tree.save_version();

        let mut exporter = tree.latest().unwrap().export();
        exporter.next_node();
        exporter.next_node();
        let err = exporter.finish().unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::ExportIncomplete { expected: 15, exported: 2 }
        ));
    }
}
