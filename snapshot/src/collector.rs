//! Chunk collection on the receiving side
//!
//! Chunks may arrive out of order and more than once. Each one is checked
//! against its advertised hash before it is stored; once every slot is
//! filled the byte stream is decoded back into the payload list.

use tracing::{debug, info, warn};
use vellum_core::{SnapshotError, SnapshotResult};
use vellum_crypto::content_hash_hex;

use crate::payload::Payload;
use crate::snapshot::Snapshot;
use crate::types::{Chunk, RawChunk};

/// Lifecycle of a snapshot being assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectState {
    Empty,
    Collecting,
    Complete,
    Rejected,
}

/// Mutable chunk bookkeeping, always accessed under the snapshot's lock
#[derive(Debug)]
pub(crate) struct Assembly {
    slots: Vec<Option<Vec<u8>>>,
    seen: u32,
    byte_len: usize,
    state: CollectState,
    nodes: Vec<Payload>,
}

impl Assembly {
    pub(crate) fn empty(total: u32) -> Self {
        Self {
            slots: vec![None; total as usize],
            seen: 0,
            byte_len: 0,
            state: CollectState::Empty,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn complete(byte_chunks: Vec<Vec<u8>>, nodes: Vec<Payload>) -> Self {
        let byte_len = byte_chunks.iter().map(Vec::len).sum();
        Self {
            seen: byte_chunks.len() as u32,
            slots: byte_chunks.into_iter().map(Some).collect(),
            byte_len,
            state: CollectState::Complete,
            nodes,
        }
    }

    pub(crate) fn slot(&self, index: u32) -> Option<&[u8]> {
        self.slots.get(index as usize)?.as_deref()
    }

    pub(crate) fn state(&self) -> CollectState {
        self.state
    }

    pub(crate) fn nodes(&self) -> &[Payload] {
        &self.nodes
    }

    pub(crate) fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn assemble(&mut self) -> SnapshotResult<()> {
        let mut stream = Vec::with_capacity(self.byte_len);
        for slot in self.slots.iter().flatten() {
            stream.extend_from_slice(slot);
        }
        match Chunk::from_bytes(&stream) {
            Ok(chunk) => {
                self.nodes = chunk.data;
                self.state = CollectState::Complete;
                Ok(())
            }
            Err(e) => {
                self.state = CollectState::Rejected;
                Err(e)
            }
        }
    }
}

impl Snapshot {
    /// Verify and store one chunk.
    ///
    /// Hash mismatches and out-of-range indices leave the snapshot as it
    /// was, so the chunk can simply be requested again. Storing the last
    /// slot while earlier ones are still missing reports `MissingChunks`;
    /// the chunk itself is kept.
    pub fn load_chunk(&self, raw: RawChunk) -> SnapshotResult<()> {
        if raw.format != self.format {
            return Err(SnapshotError::SnapshotFormatMismatch);
        }
        if raw.height != self.height {
            return Err(SnapshotError::UnknownSnapshotHeight(raw.height));
        }

        let mut assembly = self.assembly.lock();
        if assembly.state == CollectState::Rejected {
            return Err(SnapshotError::SnapshotRejected(format!(
                "snapshot at height {} can no longer accept chunks",
                self.height
            )));
        }

        let out_of_range = SnapshotError::ChunkOutOfRange {
            index: raw.nr,
            total: self.chunks,
        };
        if raw.nr >= self.chunks {
            return Err(out_of_range);
        }
        let expected = self
            .meta
            .chunk_hashes
            .get(raw.nr as usize)
            .ok_or(out_of_range)?;
        let actual = content_hash_hex(&raw.data);
        if &actual != expected {
            warn!("Rejected chunk {} of snapshot {}: hash mismatch", raw.nr, self.height);
            return Err(SnapshotError::ChunkHashMismatch {
                index: raw.nr,
                expected: expected.clone(),
                actual,
            });
        }

        if assembly.state == CollectState::Complete {
            debug!("Chunk {} delivered after snapshot completed", raw.nr);
            return Ok(());
        }
        let index = raw.nr as usize;
        if assembly.slots[index].is_some() {
            debug!("Chunk {} already stored", raw.nr);
            return Ok(());
        }
        assembly.byte_len += raw.data.len();
        assembly.slots[index] = Some(raw.data);
        assembly.seen += 1;
        assembly.state = CollectState::Collecting;
        debug!("Accepted chunk {} ({}/{})", raw.nr, assembly.seen, self.chunks);

        if assembly.seen == self.chunks {
            assembly.assemble()?;
            info!(
                "Snapshot {} complete: {} chunks, {} bytes, {} payloads",
                self.height,
                self.chunks,
                assembly.byte_len,
                assembly.nodes.len()
            );
            return Ok(());
        }
        if raw.nr + 1 == self.chunks {
            return Err(SnapshotError::MissingChunks {
                missing: assembly.missing(),
            });
        }
        Ok(())
    }

    /// Whether every chunk has arrived and decoded
    pub fn ready(&self) -> bool {
        self.assembly.lock().state == CollectState::Complete
    }

    pub fn state(&self) -> CollectState {
        self.assembly.lock().state
    }

    /// Indices of the chunks still to be delivered
    pub fn missing(&self) -> Vec<u32> {
        self.assembly.lock().missing()
    }

    pub fn chunks_seen(&self) -> u32 {
        self.assembly.lock().seen
    }

    /// Total bytes of the chunks received so far
    pub fn byte_len(&self) -> usize {
        self.assembly.lock().byte_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Checkpoint, SeenRefs};
    use crate::test_support::tree_with;
    use std::sync::Arc;
    use vellum_core::ChunkLimits;

    /// Three chunks under tight limits
    fn three_chunks() -> Snapshot {
        let tree = tree_with(vec![Payload::Checkpoint(Checkpoint {
            next_cp: 7,
            state: vec![0x5a; 2_500],
        })]);
        let snap = Snapshot::from_tree(&tree, ChunkLimits::new(1_000, 1_000)).unwrap();
        assert_eq!(snap.chunks, 3);
        snap
    }

    fn receiver(snap: &Snapshot) -> Snapshot {
        Snapshot::from_offer(&snap.offer().unwrap()).unwrap()
    }

    #[test]
    fn test_out_of_order_delivery() {
        let src = three_chunks();
        let dst = receiver(&src);

        dst.load_chunk(src.raw_chunk(1).unwrap()).unwrap();
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        assert!(!dst.ready());
        dst.load_chunk(src.raw_chunk(2).unwrap()).unwrap();

        assert!(dst.ready());
        assert_eq!(dst.nodes().unwrap(), src.nodes().unwrap());
        assert_eq!(dst.byte_len(), src.byte_len());
    }

    #[test]
    fn test_gap_is_reported() {
        let src = three_chunks();
        let dst = receiver(&src);

        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        let err = dst.load_chunk(src.raw_chunk(2).unwrap()).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingChunks { ref missing } if missing == &vec![1]));
        assert!(err.is_retryable());
        assert!(!dst.ready());
        assert_eq!(dst.missing(), vec![1]);

        // filling the gap completes the snapshot
        dst.load_chunk(src.raw_chunk(1).unwrap()).unwrap();
        assert!(dst.ready());
    }

    #[test]
    fn test_tampered_chunk_is_rejected() {
        let src = three_chunks();
        let dst = receiver(&src);

        let mut raw = src.raw_chunk(1).unwrap();
        raw.data[10] ^= 0x01;
        let err = dst.load_chunk(raw).unwrap_err();
        assert!(matches!(err, SnapshotError::ChunkHashMismatch { index: 1, .. }));
        assert_eq!(dst.chunks_seen(), 0);
        assert_eq!(dst.state(), CollectState::Empty);
    }

    #[test]
    fn test_duplicate_delivery_is_a_no_op() {
        let src = three_chunks();
        let dst = receiver(&src);

        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        assert_eq!(dst.chunks_seen(), 1);
        assert_eq!(dst.missing(), vec![1, 2]);
    }

    #[test]
    fn test_index_out_of_range() {
        let src = three_chunks();
        let dst = receiver(&src);
        let mut raw = src.raw_chunk(0).unwrap();
        raw.nr = 3;
        assert!(matches!(
            dst.load_chunk(raw),
            Err(SnapshotError::ChunkOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_wrong_height_is_rejected() {
        let src = three_chunks();
        let dst = receiver(&src);
        let mut raw = src.raw_chunk(0).unwrap();
        raw.height += 1;
        assert!(matches!(
            dst.load_chunk(raw),
            Err(SnapshotError::UnknownSnapshotHeight(_))
        ));
    }

    #[test]
    fn test_reassembly_is_byte_identical() {
        let src = three_chunks();
        let a = receiver(&src);
        let b = receiver(&src);
        for i in [2, 0, 1] {
            let _ = a.load_chunk(src.raw_chunk(i).unwrap());
        }
        for i in 0..3 {
            b.load_chunk(src.raw_chunk(i).unwrap()).unwrap();
        }
        assert_eq!(a.raw_chunks().unwrap(), b.raw_chunks().unwrap());
        assert_eq!(a.nodes().unwrap(), b.nodes().unwrap());
    }

    #[test]
    fn test_complete_snapshot_still_checks_chunks() {
        let src = three_chunks();
        let dst = receiver(&src);
        for i in 0..3 {
            dst.load_chunk(src.raw_chunk(i).unwrap()).unwrap();
        }
        assert!(dst.ready());

        let mut raw = src.raw_chunk(0).unwrap();
        raw.nr = 99;
        assert!(matches!(
            dst.load_chunk(raw),
            Err(SnapshotError::ChunkOutOfRange { index: 99, total: 3 })
        ));

        let mut raw = src.raw_chunk(1).unwrap();
        raw.data[0] ^= 0x01;
        assert!(matches!(
            dst.load_chunk(raw),
            Err(SnapshotError::ChunkHashMismatch { index: 1, .. })
        ));

        // a verified re-delivery is still accepted
        dst.load_chunk(src.raw_chunk(2).unwrap()).unwrap();
        assert_eq!(dst.chunks_seen(), 3);
        assert!(dst.ready());
    }

    #[test]
    fn test_concurrent_delivery() {
        let src = Arc::new(three_chunks());
        let dst = Arc::new(receiver(&src));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let src = src.clone();
                let dst = dst.clone();
                std::thread::spawn(move || {
                    for step in 0..src.chunks {
                        let index = (step + t) % src.chunks;
                        // a gap error is expected while other threads catch up
                        let _ = dst.load_chunk(src.raw_chunk(index).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(dst.ready());
        assert_eq!(dst.chunks_seen(), src.chunks);
        assert_eq!(dst.byte_len(), src.byte_len());
        assert_eq!(dst.nodes().unwrap(), src.nodes().unwrap());
        assert_eq!(dst.raw_chunks().unwrap(), src.raw_chunks().unwrap());
    }

    #[test]
    fn test_nodes_unavailable_until_complete() {
        let tree = tree_with(vec![Payload::BankingSeen(SeenRefs::default())]);
        let src = Snapshot::from_tree(&tree, ChunkLimits::default()).unwrap();
        let dst = receiver(&src);
        assert!(matches!(dst.nodes(), Err(SnapshotError::MissingChunks { .. })));
        dst.load_chunk(src.raw_chunk(0).unwrap()).unwrap();
        assert_eq!(dst.nodes().unwrap().len(), 2);
    }
}
