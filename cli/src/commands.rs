//! CLI Commands

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;
use vellum_core::{BlockHeight, Hash, SnapshotConfig};
use vellum_snapshot::{RawChunk, Snapshot, SnapshotFormat, SnapshotOffer, SnapshotStore};
use vellum_state::MutableTree;

const OFFER_FILE: &str = "offer.json";

fn chunk_file(index: u32) -> String {
    format!("chunk-{:04}.bin", index)
}

pub fn open_store(config: &SnapshotConfig) -> anyhow::Result<SnapshotStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    Ok(SnapshotStore::open(config.db_path())?)
}

/// One line of `vellum list`
#[derive(Debug)]
pub struct ListRow {
    pub height: BlockHeight,
    pub chunks: u32,
    pub hash: String,
}

pub fn list(store: &SnapshotStore) -> anyhow::Result<Vec<ListRow>> {
    let mut rows = Vec::new();
    for height in store.heights()?.into_iter().rev() {
        let offer = store.offer(height)?;
        rows.push(ListRow {
            height,
            chunks: offer.chunks,
            hash: offer.hash.to_hex(),
        });
    }
    Ok(rows)
}

/// Collect every stored chunk of `height` into a complete snapshot
fn collect(store: &SnapshotStore, height: BlockHeight) -> anyhow::Result<Snapshot> {
    let offer = store.offer(height)?;
    let snapshot = Snapshot::from_offer(&offer)?;
    for index in 0..offer.chunks {
        snapshot
            .load_chunk(store.chunk(height, index)?)
            .with_context(|| format!("loading chunk {} of snapshot {}", index, height))?;
    }
    Ok(snapshot)
}

/// JSON view of a stored snapshot
#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub height: BlockHeight,
    pub format: u32,
    pub hash: String,
    pub tree_version: i64,
    pub chunks: u32,
    pub nodes: usize,
    pub leaves: usize,
    pub chain_id: String,
    pub block: String,
    pub block_time: Option<String>,
    pub protocol_version: String,
    pub protocol_upgrade: bool,
    pub payloads: Vec<String>,
    pub chunk_hashes: Vec<String>,
}

pub fn inspect(store: &SnapshotStore, height: BlockHeight) -> anyhow::Result<SnapshotSummary> {
    let snapshot = collect(store, height)?;
    let app = snapshot.app_state()?;
    let payloads = snapshot.nodes()?.iter().map(|p| p.tree_key()).collect();
    Ok(SnapshotSummary {
        height: snapshot.height,
        format: snapshot.format.as_u32(),
        hash: snapshot.hash.to_hex(),
        tree_version: snapshot.meta.version,
        chunks: snapshot.chunks,
        nodes: snapshot.meta.node_hashes.len(),
        leaves: snapshot.meta.leaf_count(),
        chain_id: app.chain_id,
        block: app.block,
        block_time: block_time(app.time),
        protocol_version: snapshot.meta.protocol_version.clone(),
        protocol_upgrade: snapshot.meta.protocol_upgrade,
        payloads,
        chunk_hashes: snapshot.meta.chunk_hashes.clone(),
    })
}

fn block_time(nanos: i64) -> Option<String> {
    let secs = nanos.div_euclid(1_000_000_000);
    let sub = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, sub).map(|t| t.to_rfc3339())
}

/// Rebuild the tree from the stored chunks; returns the verified root hash
pub fn verify(store: &SnapshotStore, height: BlockHeight) -> anyhow::Result<Hash> {
    let snapshot = collect(store, height)?;
    let mut tree = MutableTree::new();
    let hash = snapshot.import_into(&mut tree)?;
    Ok(hash)
}

/// `offer.json` as written by `export`; binary fields are hex encoded
#[derive(Debug, Serialize, Deserialize)]
struct OfferFile {
    height: BlockHeight,
    format: u32,
    chunks: u32,
    hash: String,
    metadata: String,
}

impl From<&SnapshotOffer> for OfferFile {
    fn from(offer: &SnapshotOffer) -> Self {
        Self {
            height: offer.height,
            format: offer.format,
            chunks: offer.chunks,
            hash: offer.hash.to_hex(),
            metadata: hex::encode(&offer.metadata),
        }
    }
}

impl OfferFile {
    fn into_offer(self) -> anyhow::Result<SnapshotOffer> {
        Ok(SnapshotOffer {
            height: self.height,
            format: self.format,
            chunks: self.chunks,
            hash: Hash::from_hex(&self.hash).context("invalid snapshot hash")?,
            metadata: hex::decode(&self.metadata).context("invalid snapshot metadata")?,
        })
    }
}

/// Write the snapshot at `height` to `out_dir`, returning the chunk count
pub fn export(store: &SnapshotStore, height: BlockHeight, out_dir: &Path) -> anyhow::Result<u32> {
    let offer = store.offer(height)?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    for index in 0..offer.chunks {
        let chunk = store.chunk(height, index)?;
        fs::write(out_dir.join(chunk_file(index)), &chunk.data)?;
    }
    let json = serde_json::to_string_pretty(&OfferFile::from(&offer))?;
    fs::write(out_dir.join(OFFER_FILE), json)?;
    info!("Exported snapshot {} to {}", height, out_dir.display());
    Ok(offer.chunks)
}

/// Read an exported snapshot, verify it end to end and store it
pub fn import(store: &SnapshotStore, dir: &Path) -> anyhow::Result<BlockHeight> {
    let json = fs::read_to_string(dir.join(OFFER_FILE))
        .with_context(|| format!("reading {}", dir.join(OFFER_FILE).display()))?;
    let offer = serde_json::from_str::<OfferFile>(&json)?.into_offer()?;
    let format = SnapshotFormat::from_u32(offer.format)?;
    let snapshot = Snapshot::from_offer(&offer)?;

    for index in 0..offer.chunks {
        let path = dir.join(chunk_file(index));
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        snapshot.load_chunk(RawChunk {
            height: offer.height,
            format,
            nr: index,
            data,
        })?;
    }
    if !snapshot.ready() {
        bail!("snapshot {} is incomplete: missing chunks {:?}", offer.height, snapshot.missing());
    }

    snapshot.import_into(&mut MutableTree::new())?;
    store.save(&snapshot)?;
    info!("Imported snapshot {} from {}", offer.height, dir.display());
    Ok(offer.height)
}
