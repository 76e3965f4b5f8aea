//! Splitting the payload stream into transfer chunks

use vellum_core::{ChunkLimits, SnapshotResult};
use vellum_crypto::content_hash_hex;

use crate::payload::Payload;
use crate::types::Chunk;

/// Byte chunks of a payload stream plus their content hashes
#[derive(Debug)]
pub struct Chunked {
    pub nodes: Vec<Payload>,
    pub chunks: Vec<Vec<u8>>,
    pub hashes: Vec<String>,
}

/// Encode `nodes` as a single logical chunk and cut the bytes into
/// transfer chunks.
///
/// A stream shorter than `limits.max` stays whole. Anything larger is cut
/// into `ceil(len / limits.ideal)` ranges of equal stride; only the last
/// one may be shorter.
pub fn split(nodes: Vec<Payload>, limits: ChunkLimits) -> SnapshotResult<Chunked> {
    let whole = Chunk {
        data: nodes,
        nr: 1,
        of: 1,
    };
    let stream = whole.to_bytes()?;
    let chunks = split_bytes(stream, limits);
    let hashes = chunks.iter().map(|c| content_hash_hex(c)).collect();
    Ok(Chunked {
        nodes: whole.data,
        chunks,
        hashes,
    })
}

pub fn split_bytes(stream: Vec<u8>, limits: ChunkLimits) -> Vec<Vec<u8>> {
    if stream.len() < limits.max {
        return vec![stream];
    }
    let parts = stream.len().div_ceil(limits.ideal.max(1));
    let stride = stream.len().div_ceil(parts);
    stream.chunks(stride).map(<[u8]>::to_vec).collect()
}
