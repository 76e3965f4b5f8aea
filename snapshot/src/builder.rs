//! Building a snapshot from a saved tree version

use tracing::debug;
use vellum_core::{ChunkLimits, SnapshotError, SnapshotResult};
use vellum_crypto::content_hash_hex;
use vellum_state::ImmutableTree;

use crate::chunker;
use crate::payload::{AppState, Payload};
use crate::snapshot::Snapshot;
use crate::types::{Metadata, NodeHash};

impl Snapshot {
    /// Export `tree` and cut it into chunks.
    ///
    /// Every node contributes a `NodeHash`; leaves are decoded into
    /// payloads. The block height comes from the app state payload, which
    /// must be present.
    pub fn from_tree(tree: &ImmutableTree, limits: ChunkLimits) -> SnapshotResult<Snapshot> {
        let mut exporter = tree.export();
        let mut node_hashes = Vec::with_capacity(exporter.expected());
        let mut nodes = Vec::with_capacity(tree.size().max(0) as usize);
        let mut app: Option<AppState> = None;

        while let Some(node) = exporter.next_node() {
            match node.value {
                Some(value) => {
                    let payload = Payload::from_wire(&value)?;
                    if let Some(state) = payload.app_state() {
                        app = Some(state.clone());
                    }
                    node_hashes.push(NodeHash {
                        key: String::from_utf8_lossy(&node.key).into_owned(),
                        hash: content_hash_hex(&value),
                        is_leaf: true,
                        node_height: node.node_height,
                        version: node.version,
                    });
                    nodes.push(payload);
                }
                None => node_hashes.push(NodeHash {
                    key: String::new(),
                    hash: node.hash.to_hex(),
                    is_leaf: false,
                    node_height: node.node_height,
                    version: node.version,
                }),
            }
        }
        exporter.finish()?;
        let app = app.ok_or(SnapshotError::MissingAppStateNode)?;

        let split = chunker::split(nodes, limits)?;
        let meta = Metadata {
            version: tree.version(),
            node_hashes,
            chunk_hashes: split.hashes,
            protocol_version: app.protocol_version,
            protocol_upgrade: app.protocol_upgrade,
        };
        debug!(
            "Built snapshot at height {} from tree version {}: {} nodes, {} chunks",
            app.height,
            meta.version,
            meta.node_hashes.len(),
            split.chunks.len()
        );
        Ok(Snapshot::complete(app.height, tree.hash(), meta, split.nodes, split.chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{MatchingBook, NetParams, SeenRefs};
    use crate::test_support::tree_with;
    use vellum_state::MutableTree;

    #[test]
    fn test_node_hashes_cover_every_node() {
        let tree = tree_with(vec![
            Payload::BankingSeen(SeenRefs::default()),
            Payload::NetParams(NetParams::default()),
            Payload::MatchingBook(MatchingBook {
                market_id: "ETHUSD".into(),
                ..Default::default()
            }),
        ]);
        let snap = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();

        assert_eq!(snap.height, 10);
        assert_eq!(snap.hash, tree.hash());
        assert_eq!(snap.meta.version, tree.version());
        assert_eq!(snap.meta.node_hashes.len(), 7);
        assert_eq!(snap.meta.leaf_count(), 4);
        assert_eq!(snap.nodes().unwrap().len(), 4);
        assert!(snap
            .meta
            .node_hashes
            .iter()
            .filter(|n| !n.is_leaf)
            .all(|n| n.key.is_empty() && n.node_height > 0));
        // post-order: root last
        assert_eq!(snap.meta.node_hashes.last().unwrap().hash, tree.hash().to_hex());
    }

    #[test]
    fn test_leaf_order_follows_tree_keys() {
        let tree = tree_with(vec![
            Payload::NetParams(NetParams::default()),
            Payload::BankingSeen(SeenRefs::default()),
        ]);
        let snap = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();
        let keys: Vec<String> = snap.nodes().unwrap().iter().map(Payload::tree_key).collect();
        assert_eq!(keys, vec!["app.all", "banking.seen", "netparams.all"]);
    }

    #[test]
    fn test_missing_app_state() {
        let mut tree = MutableTree::new();
        let payload = Payload::BankingSeen(SeenRefs::default());
        tree.set(payload.tree_key().as_bytes(), payload.to_wire().unwrap());
        tree.save_version();

        let err = Snapshot::from_tree(&tree.latest().unwrap(), ChunkLimits::default()).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingAppStateNode));
    }

    #[test]
    fn test_single_node_tree() {
        let tree = tree_with(vec![]);
        let snap = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();
        assert_eq!(snap.chunks, 1);
        assert_eq!(snap.meta.node_hashes.len(), 1);
        assert_eq!(snap.meta.chunk_hashes.len(), 1);
    }
}
