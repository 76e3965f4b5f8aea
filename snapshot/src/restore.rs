//! Rebuilding the state tree from a complete snapshot

use std::collections::BTreeMap;
use tracing::{error, info};
use vellum_core::{Hash, SnapshotError, SnapshotResult};
use vellum_crypto::content_hash_hex;
use vellum_state::{ImportNode, Importer, MutableTree};

use crate::snapshot::Snapshot;

impl Snapshot {
    /// Replay the node hashes into `tree`, which must be empty.
    ///
    /// Every leaf value is checked against its `NodeHash` and the final
    /// root against the advertised snapshot hash.
    pub fn import_into(&self, tree: &mut MutableTree) -> SnapshotResult<Hash> {
        let nodes = self.nodes()?;

        let mut leaves = BTreeMap::new();
        for payload in &nodes {
            let tree_key = payload.tree_key();
            let value = payload.to_wire()?;
            if leaves.insert(tree_key.clone(), value).is_some() {
                return Err(SnapshotError::MalformedImport {
                    reason: format!("payload {} appears twice", tree_key),
                });
            }
        }

        let mut importer = Importer::new(tree, self.meta.version)?;
        for node in &self.meta.node_hashes {
            if !node.is_leaf {
                importer.add(ImportNode {
                    key: Vec::new(),
                    value: None,
                    version: node.version,
                    node_height: node.node_height,
                })?;
                continue;
            }

            let value = leaves
                .remove(&node.key)
                .ok_or_else(|| SnapshotError::MissingPayload { key: node.key.clone() })?;
            if content_hash_hex(&value) != node.hash {
                error!("Snapshot node {} not restored: hash mismatch", node.key);
                return Err(SnapshotError::NodeHashMismatch { key: node.key.clone() });
            }
            importer.add(ImportNode {
                key: node.key.clone().into_bytes(),
                value: Some(value),
                version: node.version,
                node_height: node.node_height,
            })?;
        }
        if let Some(key) = leaves.keys().next() {
            return Err(SnapshotError::MalformedImport {
                reason: format!("payload {} has no tree node", key),
            });
        }

        let hash = importer.commit()?;
        if hash != self.hash {
            return Err(SnapshotError::SnapshotHashMismatch {
                expected: self.hash.to_hex(),
                actual: hash.to_hex(),
            });
        }
        info!(
            "Imported snapshot at height {} as tree version {} ({})",
            self.height, self.meta.version, hash
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Checkpoint, MarketPositions, Payload, Position, SeenRefs};
    use crate::test_support::tree_with;
    use vellum_core::ChunkLimits;

    fn payloads() -> Vec<Payload> {
        let mut payloads = vec![
            Payload::BankingSeen(SeenRefs {
                refs: vec!["0xfeed".into()],
            }),
            Payload::Checkpoint(Checkpoint {
                next_cp: 99,
                state: vec![3; 4_000],
            }),
        ];
        for i in 0..20 {
            payloads.push(Payload::MarketPositions(MarketPositions {
                market_id: format!("market-{:02}", i),
                positions: vec![Position {
                    party: format!("party-{}", i),
                    size: i,
                    buy: i,
                    sell: 0,
                    price: "100".into(),
                }],
            }));
        }
        payloads
    }

    fn transfer(src: &Snapshot) -> Snapshot {
        let dst = Snapshot::from_offer(&src.offer().unwrap()).unwrap();
        for raw in src.raw_chunks().unwrap() {
            dst.load_chunk(raw).unwrap();
        }
        dst
    }

    #[test]
    fn test_round_trip_through_chunks() {
        let tree = tree_with(payloads());
        let src = Snapshot::from_tree(&tree, ChunkLimits::new(2_000, 1_000)).unwrap();
        assert!(src.chunks > 1);
        let dst = transfer(&src);

        let mut restored = MutableTree::new();
        let hash = dst.import_into(&mut restored).unwrap();
        let restored = restored.latest().unwrap();

        assert_eq!(hash, tree.hash());
        assert_eq!(restored.version(), tree.version());
        assert_eq!(restored.size(), tree.size());
        assert_eq!(restored.height(), tree.height());
    }

    #[test]
    fn test_tampered_node_hash() {
        let tree = tree_with(payloads());
        let src = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();
        let mut offer = src.offer().unwrap();
        let mut meta = src.meta.clone();
        let leaf = meta.node_hashes.iter_mut().find(|n| n.is_leaf).unwrap();
        leaf.hash = "00".repeat(32);
        offer.metadata = meta.to_bytes().unwrap();

        let dst = Snapshot::from_offer(&offer).unwrap();
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        let err = dst.import_into(&mut MutableTree::new()).unwrap_err();
        assert!(matches!(err, SnapshotError::NodeHashMismatch { .. }));
    }

    #[test]
    fn test_advertised_hash_mismatch() {
        let tree = tree_with(payloads());
        let src = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();
        let mut offer = src.offer().unwrap();
        offer.hash = Hash::from_bytes([1; 32]);

        let dst = Snapshot::from_offer(&offer).unwrap();
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        assert!(matches!(
            dst.import_into(&mut MutableTree::new()),
            Err(SnapshotError::SnapshotHashMismatch { .. })
        ));
    }

    #[test]
    fn test_incomplete_snapshot_cannot_import() {
        let tree = tree_with(payloads());
        let src = Snapshot::from_tree(&tree, ChunkLimits::new(2_000, 1_000)).unwrap();
        let dst = Snapshot::from_offer(&src.offer().unwrap()).unwrap();
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        assert!(matches!(
            dst.import_into(&mut MutableTree::new()),
            Err(SnapshotError::MissingChunks { .. })
        ));
    }
}
