//! The snapshot itself
//!
//! A `Snapshot` is either built locally from a saved tree version (every
//! chunk present) or created empty from a peer's offer and filled chunk by
//! chunk. Chunk bookkeeping sits behind a single mutex so chunks may be
//! delivered from several tasks.

use parking_lot::Mutex;
use vellum_core::{BlockHeight, Hash, SnapshotError, SnapshotResult};

use crate::collector::{Assembly, CollectState};
use crate::payload::{AppState, Payload};
use crate::types::{Metadata, RawChunk, SnapshotFormat, SnapshotOffer};

#[derive(Debug)]
pub struct Snapshot {
    /// Block height recorded in the app state payload
    pub height: BlockHeight,
    pub format: SnapshotFormat,
    /// Root hash of the exported tree version
    pub hash: Hash,
    pub meta: Metadata,
    /// Number of chunks in the transfer form
    pub chunks: u32,
    pub(crate) assembly: Mutex<Assembly>,
}

impl Snapshot {
    pub(crate) fn complete(
        height: BlockHeight,
        hash: Hash,
        meta: Metadata,
        nodes: Vec<Payload>,
        byte_chunks: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            height,
            format: SnapshotFormat::Bincode,
            hash,
            chunks: byte_chunks.len() as u32,
            meta,
            assembly: Mutex::new(Assembly::complete(byte_chunks, nodes)),
        }
    }

    /// Empty snapshot ready to collect the chunks a peer offered
    pub fn from_offer(offer: &SnapshotOffer) -> SnapshotResult<Self> {
        let format = SnapshotFormat::from_u32(offer.format)?;
        let meta = Metadata::from_bytes(&offer.metadata)?;
        if offer.chunks == 0 {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: "offer has no chunks".into(),
            });
        }
        if meta.chunk_hashes.len() != offer.chunks as usize {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: format!(
                    "offer advertises {} chunks but carries {} chunk hashes",
                    offer.chunks,
                    meta.chunk_hashes.len()
                ),
            });
        }
        Ok(Self {
            height: offer.height,
            format,
            hash: offer.hash,
            chunks: offer.chunks,
            meta,
            assembly: Mutex::new(Assembly::empty(offer.chunks)),
        })
    }

    /// Advertisement for this snapshot
    pub fn offer(&self) -> SnapshotResult<SnapshotOffer> {
        Ok(SnapshotOffer {
            height: self.height,
            format: self.format.as_u32(),
            chunks: self.chunks,
            hash: self.hash,
            metadata: self.meta.to_bytes()?,
        })
    }

    /// Chunk `index` in transfer form
    pub fn raw_chunk(&self, index: u32) -> SnapshotResult<RawChunk> {
        let assembly = self.assembly.lock();
        let data = assembly
            .slot(index)
            .ok_or(SnapshotError::ChunkOutOfRange {
                index,
                total: self.chunks,
            })?
            .to_vec();
        Ok(RawChunk {
            height: self.height,
            format: self.format,
            nr: index,
            data,
        })
    }

    /// Every chunk in transfer form; fails while chunks are missing
    pub fn raw_chunks(&self) -> SnapshotResult<Vec<RawChunk>> {
        (0..self.chunks).map(|i| self.raw_chunk(i)).collect()
    }

    /// Leaf payloads in tree order, available once every chunk is in
    pub fn nodes(&self) -> SnapshotResult<Vec<Payload>> {
        let assembly = self.assembly.lock();
        match assembly.state() {
            CollectState::Complete => Ok(assembly.nodes().to_vec()),
            _ => Err(SnapshotError::MissingChunks {
                missing: assembly.missing(),
            }),
        }
    }

    /// The app state payload of a complete snapshot
    pub fn app_state(&self) -> SnapshotResult<AppState> {
        let assembly = self.assembly.lock();
        assembly
            .nodes()
            .iter()
            .find_map(|p| p.app_state().cloned())
            .ok_or(SnapshotError::MissingAppStateNode)
    }

    /// Check another snapshot of the same height describes identical state
    pub fn validate_meta(&self, other: &Snapshot) -> SnapshotResult<()> {
        let (ours, theirs) = (&self.meta, &other.meta);
        if ours.chunk_hashes.len() != theirs.chunk_hashes.len() {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: format!(
                    "chunk count {} != {}",
                    ours.chunk_hashes.len(),
                    theirs.chunk_hashes.len()
                ),
            });
        }
        if ours.node_hashes.len() != theirs.node_hashes.len() {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: format!(
                    "node count {} != {}",
                    ours.node_hashes.len(),
                    theirs.node_hashes.len()
                ),
            });
        }
        if let Some(i) = ours
            .chunk_hashes
            .iter()
            .zip(&theirs.chunk_hashes)
            .position(|(a, b)| a != b)
        {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: format!("chunk {} hash differs", i),
            });
        }
        if let Some(i) = ours
            .node_hashes
            .iter()
            .zip(&theirs.node_hashes)
            .position(|(a, b)| a != b)
        {
            return Err(SnapshotError::SnapshotMetaMismatch {
                reason: format!("node {} differs", i),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{NetParams, SeenRefs};
    use crate::test_support::tree_with;
    use vellum_core::ChunkLimits;

    fn build() -> Snapshot {
        let tree = tree_with(vec![
            Payload::BankingSeen(SeenRefs {
                refs: vec!["0x01".into(), "0x02".into()],
            }),
            Payload::NetParams(NetParams::default()),
        ]);
        Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap()
    }

    #[test]
    fn test_offer_round_trip() {
        let snap = build();
        let offer = snap.offer().unwrap();
        let received = Snapshot::from_offer(&offer).unwrap();

        assert_eq!(received.height, snap.height);
        assert_eq!(received.hash, snap.hash);
        assert_eq!(received.meta, snap.meta);
        assert_eq!(received.state(), CollectState::Empty);
        assert!(snap.validate_meta(&received).is_ok());
    }

    #[test]
    fn test_offer_with_wrong_chunk_count() {
        let snap = build();
        let mut offer = snap.offer().unwrap();
        offer.chunks = 3;
        assert!(matches!(
            Snapshot::from_offer(&offer),
            Err(SnapshotError::SnapshotMetaMismatch { .. })
        ));
    }

    #[test]
    fn test_offer_with_unknown_format() {
        let snap = build();
        let mut offer = snap.offer().unwrap();
        offer.format = 42;
        assert!(matches!(
            Snapshot::from_offer(&offer),
            Err(SnapshotError::UnknownSnapshotFormat(42))
        ));
    }

    #[test]
    fn test_independent_builds_have_equal_meta() {
        let a = build();
        let b = build();
        assert!(a.validate_meta(&b).is_ok());
    }

    #[test]
    fn test_flipped_node_hash_is_detected() {
        let a = build();
        let mut b = build();
        let node = &mut b.meta.node_hashes[0];
        let flipped = if node.hash.starts_with('0') { "1" } else { "0" };
        node.hash.replace_range(0..1, flipped);
        assert!(matches!(
            a.validate_meta(&b),
            Err(SnapshotError::SnapshotMetaMismatch { .. })
        ));
    }

    #[test]
    fn test_raw_chunk_out_of_range() {
        let snap = build();
        assert!(snap.raw_chunk(0).is_ok());
        assert!(matches!(
            snap.raw_chunk(1),
            Err(SnapshotError::ChunkOutOfRange { index: 1, total: 1 })
        ));
    }
}
