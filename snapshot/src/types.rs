//! Snapshot wire types

use serde::{Deserialize, Serialize};
use vellum_core::{BlockHeight, Hash, SnapshotError, SnapshotResult, TreeVersion};

use crate::payload::Payload;

/// Encoding of a snapshot's chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotFormat {
    /// bincode-encoded payload stream
    Bincode,
}

impl SnapshotFormat {
    pub fn as_u32(&self) -> u32 {
        match self {
            SnapshotFormat::Bincode => 1,
        }
    }

    pub fn from_u32(value: u32) -> SnapshotResult<Self> {
        match value {
            1 => Ok(SnapshotFormat::Bincode),
            other => Err(SnapshotError::UnknownSnapshotFormat(other)),
        }
    }
}

/// Position and content hash of one tree node, without its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHash {
    /// Tree key for leaves, empty for inner nodes
    pub key: String,
    /// Content hash of the leaf value, or the node hash of an inner node (hex)
    pub hash: String,
    pub is_leaf: bool,
    /// Height of the node inside the tree, unrelated to the block height
    pub node_height: i32,
    /// Tree version in which the node was last written
    pub version: TreeVersion,
}

/// Everything needed to verify a snapshot before its chunks arrive
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub version: TreeVersion,
    /// One entry per tree node, in export order
    pub node_hashes: Vec<NodeHash>,
    /// One content hash per chunk, in chunk order (hex)
    pub chunk_hashes: Vec<String>,
    pub protocol_version: String,
    pub protocol_upgrade: bool,
}

impl Metadata {
    pub fn to_bytes(&self) -> SnapshotResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SnapshotResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn leaf_count(&self) -> usize {
        self.node_hashes.iter().filter(|n| n.is_leaf).count()
    }
}

/// A run of payloads and its position in the chunk sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<Payload>,
    pub nr: i64,
    pub of: i64,
}

#[derive(Serialize, Deserialize)]
struct WireChunk {
    data: Vec<Vec<u8>>,
    nr: i64,
    of: i64,
}

impl Chunk {
    pub fn to_bytes(&self) -> SnapshotResult<Vec<u8>> {
        let data = self
            .data
            .iter()
            .map(Payload::to_wire)
            .collect::<SnapshotResult<Vec<_>>>()?;
        Ok(bincode::serialize(&WireChunk {
            data,
            nr: self.nr,
            of: self.of,
        })?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SnapshotResult<Self> {
        let wire: WireChunk = bincode::deserialize(bytes)?;
        let data = wire
            .data
            .iter()
            .map(|b| Payload::from_wire(b))
            .collect::<SnapshotResult<Vec<_>>>()?;
        Ok(Self {
            data,
            nr: wire.nr,
            of: wire.of,
        })
    }
}

/// One chunk in transfer form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChunk {
    pub height: BlockHeight,
    pub format: SnapshotFormat,
    /// 0-based index into the chunk sequence
    pub nr: u32,
    pub data: Vec<u8>,
}

/// What a node advertises before any chunk is transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotOffer {
    pub height: BlockHeight,
    pub format: u32,
    pub chunks: u32,
    pub hash: Hash,
    /// bincode of `Metadata`
    pub metadata: Vec<u8>,
}

impl SnapshotOffer {
    pub fn to_bytes(&self) -> SnapshotResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SnapshotResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SeenRefs;

    #[test]
    fn test_format_from_u32() {
        assert_eq!(SnapshotFormat::from_u32(1).unwrap(), SnapshotFormat::Bincode);
        assert!(matches!(
            SnapshotFormat::from_u32(7),
            Err(SnapshotError::UnknownSnapshotFormat(7))
        ));
    }

    #[test]
    fn test_chunk_decode_surfaces_unknown_payload() {
        let good = Payload::BankingSeen(SeenRefs {
            refs: vec!["0xabc".into()],
        });
        let wire = WireChunk {
            data: vec![good.to_wire().unwrap(), vec![0xff; 12]],
            nr: 1,
            of: 1,
        };
        let bytes = bincode::serialize(&wire).unwrap();
        assert!(Chunk::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_leaf_count() {
        let meta = Metadata {
            node_hashes: vec![
                NodeHash {
                    key: "app.all".into(),
                    hash: "aa".into(),
                    is_leaf: true,
                    node_height: 0,
                    version: 1,
                },
                NodeHash {
                    key: String::new(),
                    hash: "bb".into(),
                    is_leaf: false,
                    node_height: 1,
                    version: 1,
                },
            ],
            ..Default::default()
        };
        assert_eq!(meta.leaf_count(), 1);
    }
}
