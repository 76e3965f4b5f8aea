//! Hashing functions: SHA-256 for content, BLAKE3 for tree nodes

use sha2::{Digest, Sha256};
use vellum_core::Hash;

/// Compute SHA-256 hash of data
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Content hash of a value or a transferred chunk.
///
/// Nodes on both sides of a state sync must agree on this function, so it
/// must never change for an existing snapshot format.
pub fn content_hash(data: &[u8]) -> Hash {
    sha256_hash(data)
}

/// Hex-encoded content hash, the form carried in snapshot metadata
pub fn content_hash_hex(data: &[u8]) -> String {
    content_hash(data).to_hex()
}

/// Incremental hasher for tree nodes
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }
    
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }
    
    /// Feed a length-prefixed byte string
    pub fn update_prefixed(&mut self, data: &[u8]) {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }
    
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(&value.to_le_bytes());
    }
    
    pub fn finalize(self) -> Hash {
        let hash = self.hasher.finalize();
        Hash::from_bytes(*hash.as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
