//! Immutable nodes of the versioned Merkle AVL tree
//!
//! Nodes are never mutated once built: every write path-copies from the
//! changed leaf up to a new root, so saved versions share untouched
//! subtrees through `Arc`.

use std::cmp::Ordering;
use std::sync::Arc;
use vellum_core::Hash;
use vellum_crypto::{content_hash, IncrementalHasher};

/// Leaf payload or the two children of an inner node
#[derive(Debug)]
pub(crate) enum Kind {
    Leaf { value: Vec<u8> },
    Inner { left: Arc<Node>, right: Arc<Node> },
}

/// A tree node with its hash computed at construction
#[derive(Debug)]
pub struct Node {
    /// Leaf key, or the smallest key of the right subtree for inner nodes
    pub(crate) key: Vec<u8>,
    pub(crate) version: i64,
    pub(crate) height: i32,
    pub(crate) size: i64,
    pub(crate) hash: Hash,
    pub(crate) kind: Kind,
}

impl Node {
    pub(crate) fn leaf(key: Vec<u8>, value: Vec<u8>, version: i64) -> Arc<Node> {
        let mut hasher = IncrementalHasher::new();
        hasher.update_i64(0);
        hasher.update_i64(1);
        hasher.update_i64(version);
        hasher.update_prefixed(&key);
        hasher.update_prefixed(content_hash(&value).as_bytes());
        Arc::new(Node {
            key,
            version,
            height: 0,
            size: 1,
            hash: hasher.finalize(),
            kind: Kind::Leaf { value },
        })
    }

    pub(crate) fn inner(key: Vec<u8>, left: Arc<Node>, right: Arc<Node>, version: i64) -> Arc<Node> {
        let height = 1 + left.height.max(right.height);
        let size = left.size + right.size;
        let mut hasher = IncrementalHasher::new();
        hasher.update_i64(height as i64);
        hasher.update_i64(size);
        hasher.update_i64(version);
        hasher.update(left.hash.as_bytes());
        hasher.update(right.hash.as_bytes());
        Arc::new(Node {
            key,
            version,
            height,
            size,
            hash: hasher.finalize(),
            kind: Kind::Inner { left, right },
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Stored value, `None` for inner nodes
    pub fn value(&self) -> Option<&[u8]> {
        match &self.kind {
            Kind::Leaf { value } => Some(value),
            Kind::Inner { .. } => None,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Height of the node inside the tree, 0 for leaves
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Number of leaves below (and including) this node
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, Kind::Leaf { .. })
    }

    pub(crate) fn children(&self) -> Option<(&Arc<Node>, &Arc<Node>)> {
        match &self.kind {
            Kind::Inner { left, right } => Some((left, right)),
            Kind::Leaf { .. } => None,
        }
    }

    /// Height difference between left and right subtrees
    pub(crate) fn balance_factor(&self) -> i32 {
        match self.children() {
            Some((left, right)) => left.height - right.height,
            None => 0,
        }
    }

    pub(crate) fn leftmost_key(&self) -> &[u8] {
        let mut node = self;
        while let Some((left, _)) = node.children() {
            node = left;
        }
        &node.key
    }

    pub(crate) fn rightmost_key(&self) -> &[u8] {
        let mut node = self;
        while let Some((_, right)) = node.children() {
            node = right;
        }
        &node.key
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut node = self;
        loop {
            match &node.kind {
                Kind::Leaf { value } => {
                    return if node.key == key { Some(value) } else { None };
                }
                Kind::Inner { left, right } => {
                    node = if key < node.key.as_slice() { left } else { right };
                }
            }
        }
    }
}

/// Insert or overwrite `key`, returning the new subtree and whether an
/// existing leaf was overwritten.
pub(crate) fn insert(node: &Arc<Node>, key: &[u8], value: Vec<u8>, version: i64) -> (Arc<Node>, bool) {
    let (left, right) = match node.children() {
        Some(children) => children,
        None => {
            return match key.cmp(node.key.as_slice()) {
                Ordering::Less => (
                    Node::inner(
                        node.key.clone(),
                        Node::leaf(key.to_vec(), value, version),
                        node.clone(),
                        version,
                    ),
                    false,
                ),
                Ordering::Greater => (
                    Node::inner(
                        key.to_vec(),
                        node.clone(),
                        Node::leaf(key.to_vec(), value, version),
                        version,
                    ),
                    false,
                ),
                Ordering::Equal => (Node::leaf(key.to_vec(), value, version), true),
            };
        }
    };

    let (left, right, updated) = if key < node.key.as_slice() {
        let (left, updated) = insert(left, key, value, version);
        (left, right.clone(), updated)
    } else {
        let (right, updated) = insert(right, key, value, version);
        (left.clone(), right, updated)
    };

    let node = Node::inner(node.key.clone(), left, right, version);
    if updated {
        // shape is unchanged on overwrite
        (node, true)
    } else {
        (rebalance(node, version), false)
    }
}

/// Outcome of removing a key from a subtree
pub(crate) struct Removed {
    /// Replacement subtree, `None` when the subtree vanished
    pub node: Option<Arc<Node>>,
    /// New smallest key of the subtree, when it changed
    pub new_key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

/// Remove `key`, returning `None` when it is not present.
pub(crate) fn remove(node: &Arc<Node>, key: &[u8], version: i64) -> Option<Removed> {
    let (left, right) = match &node.kind {
        Kind::Leaf { value } => {
            return (node.key == key).then(|| Removed {
                node: None,
                new_key: None,
                value: value.clone(),
            });
        }
        Kind::Inner { left, right } => (left, right),
    };

    if key < node.key.as_slice() {
        let removed = remove(left, key, version)?;
        match removed.node {
            None => Some(Removed {
                node: Some(right.clone()),
                new_key: Some(node.key.clone()),
                value: removed.value,
            }),
            Some(new_left) => {
                let inner = Node::inner(node.key.clone(), new_left, right.clone(), version);
                Some(Removed {
                    node: Some(rebalance(inner, version)),
                    new_key: removed.new_key,
                    value: removed.value,
                })
            }
        }
    } else {
        let removed = remove(right, key, version)?;
        match removed.node {
            None => Some(Removed {
                node: Some(left.clone()),
                new_key: None,
                value: removed.value,
            }),
            Some(new_right) => {
                let key = removed.new_key.unwrap_or_else(|| node.key.clone());
                let inner = Node::inner(key, left.clone(), new_right, version);
                Some(Removed {
                    node: Some(rebalance(inner, version)),
                    new_key: None,
                    value: removed.value,
                })
            }
        }
    }
}

fn rebalance(node: Arc<Node>, version: i64) -> Arc<Node> {
    let (left, right) = match node.children() {
        Some(children) => children,
        None => return node,
    };
    let factor = left.height - right.height;
    if factor > 1 {
        if left.balance_factor() >= 0 {
            rotate_right(&node, version)
        } else {
            let left = rotate_left(left, version);
            let node = Node::inner(node.key.clone(), left, right.clone(), version);
            rotate_right(&node, version)
        }
    } else if factor < -1 {
        if right.balance_factor() <= 0 {
            rotate_left(&node, version)
        } else {
            let right = rotate_right(right, version);
            let node = Node::inner(node.key.clone(), left.clone(), right, version);
            rotate_left(&node, version)
        }
    } else {
        node
    }
}

fn rotate_right(node: &Arc<Node>, version: i64) -> Arc<Node> {
    let Some((left, right)) = node.children() else {
        return node.clone();
    };
    let Some((left_left, left_right)) = left.children() else {
        return node.clone();
    };
    let lowered = Node::inner(node.key.clone(), left_right.clone(), right.clone(), version);
    Node::inner(left.key.clone(), left_left.clone(), lowered, version)
}

fn rotate_left(node: &Arc<Node>, version: i64) -> Arc<Node> {
    let Some((left, right)) = node.children() else {
        return node.clone();
    };
    let Some((right_left, right_right)) = right.children() else {
        return node.clone();
    };
    let lowered = Node::inner(node.key.clone(), left.clone(), right_left.clone(), version);
    Node::inner(right.key.clone(), lowered, right_right.clone(), version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: &[&str]) -> Arc<Node> {
        let mut iter = keys.iter();
        let first = iter.next().unwrap();
        let mut root = Node::leaf(first.as_bytes().to_vec(), b"v".to_vec(), 1);
        for key in iter {
            root = insert(&root, key.as_bytes(), b"v".to_vec(), 1).0;
        }
        root
    }

    fn assert_avl(node: &Node) {
        if let Some((left, right)) = node.children() {
            assert!((left.height - right.height).abs() <= 1, "unbalanced");
            assert_eq!(node.key(), right.leftmost_key());
            assert!(left.rightmost_key() < right.leftmost_key());
            assert_avl(left);
            assert_avl(right);
        }
    }

    #[test]
    fn test_leaf_hash_depends_on_version() {
        let a = Node::leaf(b"k".to_vec(), b"v".to_vec(), 1);
        let b = Node::leaf(b"k".to_vec(), b"v".to_vec(), 2);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let keys: Vec<String> = (0..64).map(|i| format!("key{:03}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        let root = build(&refs);
        assert_eq!(root.size(), 64);
        assert!(root.height() <= 8);
        assert_avl(&root);
    }

    #[test]
    fn test_overwrite_keeps_shape() {
        let root = build(&["a", "b", "c"]);
        let (updated, overwritten) = insert(&root, b"b", b"new".to_vec(), 2);
        assert!(overwritten);
        assert_eq!(updated.size(), 3);
        assert_eq!(updated.get(b"b"), Some(&b"new"[..]));
        assert_ne!(updated.hash(), root.hash());
    }

    #[test]
    fn test_remove_updates_inner_keys() {
        let root = build(&["a", "b", "c", "d", "e", "f", "g"]);
        let removed = remove(&root, b"d", 2).unwrap();
        let root = removed.node.unwrap();
        assert_eq!(removed.value, b"v".to_vec());
        assert_eq!(root.size(), 6);
        assert_eq!(root.get(b"d"), None);
        assert_avl(&root);
    }

    #[test]
    fn test_remove_missing_key() {
        let root = build(&["a", "b"]);
        assert!(remove(&root, b"zz", 2).is_none());
    }
}
