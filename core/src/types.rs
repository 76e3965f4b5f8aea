//! Core types for Vellum
//! 
//! Defines the fundamental values shared by the tree and the snapshot engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte hash type
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);
    
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
    
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }
    
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
    
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
    
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Hash::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

/// Version of the state tree (how many times it has been saved).
pub type TreeVersion = i64;

/// Height of the replicated chain a snapshot was taken at.
///
/// Not to be confused with the height of a node inside the tree, which is
/// carried as `node_height` wherever it appears.
pub type BlockHeight = u64;

/// Hard cap on the size of a single chunk in bytes.
pub const MAX_CHUNK_SIZE: usize = 16_000_000;

/// Target size of a chunk when a payload stream has to be split.
pub const IDEAL_CHUNK_SIZE: usize = 10_000_000;

/// Chunk size bounds used by the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLimits {
    /// A stream shorter than this stays a single chunk
    pub max: usize,
    /// Stride target once a stream has to be split
    pub ideal: usize,
}

impl ChunkLimits {
    pub fn new(max: usize, ideal: usize) -> Self {
        Self { max, ideal }
    }
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max: MAX_CHUNK_SIZE,
            ideal: IDEAL_CHUNK_SIZE,
        }
    }
}

/// Block-level facts recorded in the app-state payload of every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockContext {
    pub height: BlockHeight,
    /// Hash of the block, hex encoded
    pub block_hash: String,
    /// Block time in nanoseconds since the Unix epoch
    pub time: i64,
    pub chain_id: String,
}

impl BlockContext {
    pub fn new(height: BlockHeight, block_hash: impl Into<String>, time: i64, chain_id: impl Into<String>) -> Self {
        Self {
            height,
            block_hash: block_hash.into(),
            time,
            chain_id: chain_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_hash_hex() {
        let hash = Hash([7u8; 32]);
        let hex = hash.to_hex();
        let parsed = Hash::from_hex(&hex).unwrap();
        assert_eq!(hash, parsed);
    }
    
    #[test]
    fn test_hash_from_hex_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
    }
    
    #[test]
    fn test_default_chunk_limits() {
        let limits = ChunkLimits::default();
        assert_eq!(limits.max, 16_000_000);
        assert_eq!(limits.ideal, 10_000_000);
    }
}
