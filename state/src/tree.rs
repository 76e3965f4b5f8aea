//! Versioned Merkle AVL tree
//!
//! `MutableTree` holds the working root and every saved version;
//! `ImmutableTree` is a cheap handle on one saved version.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use vellum_core::{Hash, SnapshotError, SnapshotResult, TreeVersion};

use crate::export::Exporter;
use crate::node::{self, Node};

/// Working tree plus its saved versions
#[derive(Debug, Default, Clone)]
pub struct MutableTree {
    root: Option<Arc<Node>>,
    versions: BTreeMap<TreeVersion, Option<Arc<Node>>>,
    version: TreeVersion,
    initial_version: TreeVersion,
}

impl MutableTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first saved version `version` instead of 1
    pub fn set_initial_version(&mut self, version: TreeVersion) {
        self.initial_version = version;
    }

    /// Last saved version, 0 if nothing was saved yet
    pub fn version(&self) -> TreeVersion {
        self.version
    }

    /// Version the next `save_version` will write
    pub fn working_version(&self) -> TreeVersion {
        if self.version == 0 && self.initial_version > 0 {
            self.initial_version
        } else {
            self.version + 1
        }
    }

    /// True when there is neither a working root nor any saved version
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.versions.is_empty()
    }

    pub fn size(&self) -> i64 {
        self.root.as_ref().map(|r| r.size()).unwrap_or(0)
    }

    /// Set `key` to `value`, returning true if an existing value was replaced
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> bool {
        let version = self.working_version();
        match &self.root {
            None => {
                self.root = Some(Node::leaf(key.to_vec(), value, version));
                false
            }
            Some(root) => {
                let (root, updated) = node::insert(root, key, value, version);
                self.root = Some(root);
                updated
            }
        }
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let version = self.working_version();
        let root = self.root.as_ref()?;
        let removed = node::remove(root, key, version)?;
        self.root = removed.node;
        Some(removed.value)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.root.as_ref().and_then(|r| r.get(key))
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Root hash of the working (unsaved) tree
    pub fn working_hash(&self) -> Hash {
        self.root.as_ref().map(|r| r.hash()).unwrap_or(Hash::ZERO)
    }

    /// Save the working tree as a new version
    pub fn save_version(&mut self) -> (Hash, TreeVersion) {
        let version = self.working_version();
        self.versions.insert(version, self.root.clone());
        self.version = version;
        let hash = self.working_hash();
        debug!("Saved tree version {} with root {}", version, hash);
        (hash, version)
    }

    pub fn version_exists(&self, version: TreeVersion) -> bool {
        self.versions.contains_key(&version)
    }

    pub fn available_versions(&self) -> Vec<TreeVersion> {
        self.versions.keys().copied().collect()
    }

    /// Handle on a saved version
    pub fn get_immutable(&self, version: TreeVersion) -> SnapshotResult<ImmutableTree> {
        self.versions
            .get(&version)
            .map(|root| ImmutableTree::new(root.clone(), version))
            .ok_or(SnapshotError::VersionNotFound(version))
    }

    /// Handle on the most recently saved version
    pub fn latest(&self) -> Option<ImmutableTree> {
        self.versions
            .iter()
            .next_back()
            .map(|(version, root)| ImmutableTree::new(root.clone(), *version))
    }

    /// Forget a saved version; the latest version cannot be deleted
    pub fn delete_version(&mut self, version: TreeVersion) -> SnapshotResult<()> {
        if version == self.version {
            return Err(SnapshotError::Internal(format!(
                "cannot delete latest tree version {}",
                version
            )));
        }
        self.versions
            .remove(&version)
            .map(|_| ())
            .ok_or(SnapshotError::VersionNotFound(version))
    }

    /// Roll back to `version`, discarding every newer version and any
    /// unsaved changes
    pub fn load_version_for_overwriting(&mut self, version: TreeVersion) -> SnapshotResult<TreeVersion> {
        let root = self
            .versions
            .get(&version)
            .cloned()
            .ok_or(SnapshotError::VersionNotFound(version))?;
        let _ = self.versions.split_off(&(version + 1));
        self.root = root;
        self.version = version;
        Ok(version)
    }

    /// Adopt an imported root as `version`
    pub(crate) fn install(&mut self, version: TreeVersion, root: Option<Arc<Node>>) {
        self.versions.insert(version, root.clone());
        self.root = root;
        self.version = version;
    }
}

/// Read-only view of one saved version
#[derive(Debug, Clone)]
pub struct ImmutableTree {
    root: Option<Arc<Node>>,
    version: TreeVersion,
}

impl ImmutableTree {
    pub(crate) fn new(root: Option<Arc<Node>>, version: TreeVersion) -> Self {
        Self { root, version }
    }

    pub fn version(&self) -> TreeVersion {
        self.version
    }

    pub fn hash(&self) -> Hash {
        self.root.as_ref().map(|r| r.hash()).unwrap_or(Hash::ZERO)
    }

    /// Number of leaves
    pub fn size(&self) -> i64 {
        self.root.as_ref().map(|r| r.size()).unwrap_or(0)
    }

    /// Height of the root node (0 for a single leaf or an empty tree)
    pub fn height(&self) -> i32 {
        self.root.as_ref().map(|r| r.height()).unwrap_or(0)
    }

    /// Total number of nodes, leaves and inner nodes
    pub fn node_count(&self) -> usize {
        match self.size() {
            0 => 0,
            n => (2 * n - 1) as usize,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.root.as_ref().and_then(|r| r.get(key))
    }

    /// Leaves in key order
    pub fn iter(&self) -> LeafIter<'_> {
        let mut stack = Vec::new();
        if let Some(root) = &self.root {
            stack.push(root.as_ref());
        }
        LeafIter { stack }
    }

    /// Depth-first, post-order export of every node
    pub fn export(&self) -> Exporter {
        Exporter::new(self.root.clone(), self.node_count())
    }
}

/// In-order iterator over `(key, value)` leaves
pub struct LeafIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for LeafIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node.children() {
                Some((left, right)) => {
                    self.stack.push(right.as_ref());
                    self.stack.push(left.as_ref());
                }
                None => {
                    if let Some(value) = node.value() {
                        return Some((node.key(), value));
                    }
                }
            }
        }
        None
    }
}
