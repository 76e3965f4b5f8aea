//! Persistent snapshot store using sled database

use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};
use vellum_core::{BlockHeight, SnapshotError, SnapshotResult};

use crate::snapshot::Snapshot;
use crate::types::{RawChunk, SnapshotFormat, SnapshotOffer};

const OFFERS_TREE: &str = "offers";
const CHUNKS_TREE: &str = "chunks";

/// Finished snapshots keyed by block height
pub struct SnapshotStore {
    db: Db,
    offers: Tree,
    chunks: Tree,
}

fn chunk_key(height: BlockHeight, index: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> SnapshotResult<Self> {
        let db = sled::open(path)?;
        let offers = db.open_tree(OFFERS_TREE)?;
        let chunks = db.open_tree(CHUNKS_TREE)?;
        Ok(Self { db, offers, chunks })
    }

    /// Store a complete snapshot, replacing any earlier one at its height
    pub fn save(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        let offer = snapshot.offer()?;
        let chunks = snapshot.raw_chunks()?;
        self.remove(snapshot.height)?;

        for chunk in &chunks {
            self.chunks
                .insert(chunk_key(snapshot.height, chunk.nr), chunk.data.as_slice())?;
        }
        self.offers
            .insert(snapshot.height.to_be_bytes(), offer.to_bytes()?)?;
        self.db.flush()?;
        debug!(
            "Stored snapshot at height {} ({} chunks)",
            snapshot.height,
            chunks.len()
        );
        Ok(())
    }

    pub fn offer(&self, height: BlockHeight) -> SnapshotResult<SnapshotOffer> {
        let bytes = self
            .offers
            .get(height.to_be_bytes())?
            .ok_or(SnapshotError::UnknownSnapshotHeight(height))?;
        SnapshotOffer::from_bytes(&bytes)
    }

    pub fn chunk(&self, height: BlockHeight, index: u32) -> SnapshotResult<RawChunk> {
        let offer = self.offer(height)?;
        let format = SnapshotFormat::from_u32(offer.format)?;
        let data = self
            .chunks
            .get(chunk_key(height, index))?
            .ok_or(SnapshotError::ChunkOutOfRange {
                index,
                total: offer.chunks,
            })?;
        Ok(RawChunk {
            height,
            format,
            nr: index,
            data: data.to_vec(),
        })
    }

    /// Stored heights, ascending
    pub fn heights(&self) -> SnapshotResult<Vec<BlockHeight>> {
        self.offers
            .iter()
            .keys()
            .map(|key| -> SnapshotResult<BlockHeight> {
                let key = key?;
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| SnapshotError::Storage("malformed snapshot height key".into()))?;
                Ok(BlockHeight::from_be_bytes(bytes))
            })
            .collect()
    }

    pub fn latest_height(&self) -> SnapshotResult<Option<BlockHeight>> {
        Ok(self.heights()?.last().copied())
    }

    pub fn remove(&self, height: BlockHeight) -> SnapshotResult<()> {
        self.offers.remove(height.to_be_bytes())?;
        for key in self.chunks.scan_prefix(height.to_be_bytes()).keys() {
            self.chunks.remove(key?)?;
        }
        Ok(())
    }

    /// Keep only the `keep` most recent snapshots, returning how many were dropped
    pub fn prune(&self, keep: usize) -> SnapshotResult<usize> {
        let heights = self.heights()?;
        let excess = heights.len().saturating_sub(keep);
        for height in &heights[..excess] {
            self.remove(*height)?;
        }
        if excess > 0 {
            self.db.flush()?;
            info!("Pruned {} stored snapshots", excess);
        }
        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{AppState, Checkpoint, Payload};
    use vellum_core::ChunkLimits;
    use vellum_state::MutableTree;

    fn snapshot_at(height: BlockHeight) -> Snapshot {
        let mut tree = MutableTree::new();
        for payload in [
            Payload::AppState(AppState {
                height,
                chain_id: "testnet".into(),
                ..Default::default()
            }),
            Payload::Checkpoint(Checkpoint {
                next_cp: height as i64,
                state: vec![1; 3_000],
            }),
        ] {
            tree.set(payload.tree_key().as_bytes(), payload.to_wire().unwrap());
        }
        tree.save_version();
        Snapshot::from_tree(&tree.latest().unwrap(), ChunkLimits::new(1_000, 1_000)).unwrap()
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::open(tmp.path().join("snapshot.db")).unwrap();
        let snap = snapshot_at(5);
        store.save(&snap).unwrap();

        let offer = store.offer(5).unwrap();
        assert_eq!(offer, snap.offer().unwrap());

        let restored = Snapshot::from_offer(&offer).unwrap();
        for i in 0..offer.chunks {
            restored.load_chunk(store.chunk(5, i).unwrap()).unwrap();
        }
        assert!(restored.ready());
        assert_eq!(restored.nodes().unwrap(), snap.nodes().unwrap());
    }

    #[test]
    fn test_unknown_height_and_chunk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::open(tmp.path().join("snapshot.db")).unwrap();
        store.save(&snapshot_at(5)).unwrap();

        assert!(matches!(
            store.offer(6),
            Err(SnapshotError::UnknownSnapshotHeight(6))
        ));
        assert!(matches!(
            store.chunk(5, 99),
            Err(SnapshotError::ChunkOutOfRange { index: 99, .. })
        ));
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::open(tmp.path().join("snapshot.db")).unwrap();
        for height in [3, 1, 2, 4] {
            store.save(&snapshot_at(height)).unwrap();
        }
        assert_eq!(store.heights().unwrap(), vec![1, 2, 3, 4]);

        assert_eq!(store.prune(2).unwrap(), 2);
        assert_eq!(store.heights().unwrap(), vec![3, 4]);
        assert_eq!(store.latest_height().unwrap(), Some(4));
        assert!(store.chunk(1, 0).is_err());
    }

    #[test]
    fn test_reopen_keeps_snapshots() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.db");
        {
            let store = SnapshotStore::open(&path).unwrap();
            store.save(&snapshot_at(8)).unwrap();
        }
        let store = SnapshotStore::open(&path).unwrap();
        assert_eq!(store.latest_height().unwrap(), Some(8));
    }
}
