//! Snapshot engine
//!
//! Owns the state tree and the provider registry. On the producing side it
//! collects state from every provider into a new tree version and serves
//! chunks of it; on the receiving side it collects a peer's chunks,
//! rebuilds the tree and hands each payload back to its provider.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vellum_core::{
    BlockContext, BlockHeight, Hash, SnapshotConfig, SnapshotError, SnapshotResult, StorageMethod,
    TreeVersion,
};
use vellum_state::MutableTree;

use crate::payload::{AppState, Namespace, Payload};
use crate::provider::{Generated, ProviderRegistry, StateProvider};
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;
use crate::types::{RawChunk, SnapshotFormat, SnapshotOffer};

/// How many saved versions `list` reports
const LIST_LIMIT: usize = 10;

/// Summary of the last snapshot taken or restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub hash: Hash,
    pub height: BlockHeight,
    pub chain_id: String,
}

/// Outcome of asking a provider for one key
enum Fetched {
    State(Vec<u8>, Generated),
    Stopped,
}

type FetchResult = (String, SnapshotResult<Fetched>);

pub struct SnapshotEngine {
    config: SnapshotConfig,
    tree: MutableTree,
    registry: ProviderRegistry,
    store: Option<SnapshotStore>,

    app: AppState,
    /// Saved versions still held in memory, oldest first
    versions: VecDeque<TreeVersion>,
    version_height: BTreeMap<BlockHeight, TreeVersion>,
    last_hash: Hash,

    interval: u64,
    /// Blocks left until the next snapshot
    current: u64,

    /// Snapshot being received from peers
    pending: Option<Arc<Snapshot>>,
    retries: u32,
    /// Local snapshot whose chunks are being served
    serving: Option<Arc<Snapshot>>,
}

impl SnapshotEngine {
    pub fn new(config: SnapshotConfig) -> SnapshotResult<Self> {
        config.validate()?;
        let store = match config.storage {
            StorageMethod::Memory => None,
            StorageMethod::Sled => {
                std::fs::create_dir_all(&config.data_dir)?;
                Some(SnapshotStore::open(config.db_path())?)
            }
        };
        let interval = config.interval;
        Ok(Self {
            config,
            tree: MutableTree::new(),
            registry: ProviderRegistry::new(),
            store,
            app: AppState {
                protocol_version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            versions: VecDeque::new(),
            version_height: BTreeMap::new(),
            last_hash: Hash::ZERO,
            interval,
            current: interval,
            pending: None,
            retries: 0,
            serving: None,
        })
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn tree(&self) -> &MutableTree {
        &self.tree
    }

    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    /// Register providers with the engine
    pub fn add_providers<I>(&mut self, providers: I)
    where
        I: IntoIterator<Item = Arc<dyn StateProvider>>,
    {
        for provider in providers {
            self.registry.add(provider);
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Record the protocol version and whether an upgrade is due at the
    /// next snapshot
    pub fn set_protocol(&mut self, version: impl Into<String>, upgrade: bool) {
        self.app.protocol_version = version.into();
        self.app.protocol_upgrade = upgrade;
    }

    /// Change the snapshot interval, taking effect immediately if it is
    /// shorter than the current countdown
    pub fn set_interval(&mut self, interval: u64) {
        self.interval = interval.max(1);
        if self.interval < self.current {
            self.current = self.interval;
        }
    }

    /// Count down one block and take a snapshot when the interval is up
    pub async fn snapshot(&mut self, ctx: &BlockContext) -> SnapshotResult<Option<Hash>> {
        self.current = self.current.saturating_sub(1);
        if self.current > 0 {
            return Ok(None);
        }
        self.current = self.interval;
        self.snapshot_now(ctx).await.map(Some)
    }

    /// Root hash of the last snapshot, taking one if there is none yet
    pub async fn hash(&mut self, ctx: &BlockContext) -> SnapshotResult<Hash> {
        if !self.last_hash.is_zero() {
            return Ok(self.last_hash);
        }
        self.snapshot_now(ctx).await
    }

    /// Collect state from every provider and save a new tree version
    pub async fn snapshot_now(&mut self, ctx: &BlockContext) -> SnapshotResult<Hash> {
        let results = self.collect_state().await?;

        let mut updated = false;
        for (tree_key, state) in results {
            let key = tree_key.as_bytes();
            match state {
                None => {
                    debug!("State to be removed: {}", tree_key);
                    self.registry.remove(&tree_key);
                    updated |= self.tree.remove(key).is_some();
                }
                Some(bytes) if bytes.is_empty() => {
                    updated |= self.tree.remove(key).is_some();
                }
                Some(bytes) => {
                    if self.tree.get(key) == Some(bytes.as_slice()) {
                        continue;
                    }
                    let payload = Payload::from_wire(&bytes)?;
                    let actual = payload.tree_key();
                    if actual != tree_key {
                        return Err(SnapshotError::ProviderKeyMismatch {
                            expected: tree_key,
                            actual,
                        });
                    }
                    debug!("State updated: {}", tree_key);
                    self.tree.set(key, bytes);
                    updated = true;
                }
            }
        }

        if self.update_app_state(ctx)? {
            updated = true;
        }
        if !updated {
            return Ok(self.last_hash);
        }

        let hash = self.save_current_tree(ctx.height)?;
        info!("Snapshot taken at height {} with hash {}", ctx.height, hash);
        Ok(hash)
    }

    /// Ask every registered key for its state, bounded by `workers`.
    ///
    /// Providers generated along the way are registered and their keys
    /// queried in the same pass. `None` marks a stopped provider.
    async fn collect_state(&mut self) -> SnapshotResult<BTreeMap<String, Option<Vec<u8>>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<FetchResult> = JoinSet::new();
        for tree_key in self.registry.tree_keys() {
            self.spawn_fetch(&mut tasks, &semaphore, tree_key);
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (tree_key, fetched) =
                joined.map_err(|e| SnapshotError::Internal(format!("state provider task failed: {}", e)))?;
            match fetched {
                Ok(Fetched::Stopped) => {
                    results.insert(tree_key, None);
                }
                Ok(Fetched::State(bytes, generated)) => {
                    for provider in generated {
                        debug!("Provider generated for {}", provider.namespace());
                        for new_key in self.registry.add(provider) {
                            self.spawn_fetch(&mut tasks, &semaphore, new_key);
                        }
                    }
                    results.insert(tree_key, Some(bytes));
                }
                Err(e) => {
                    error!("Failed to get state for {}: {}", tree_key, e);
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    fn spawn_fetch(&self, tasks: &mut JoinSet<FetchResult>, semaphore: &Arc<Semaphore>, tree_key: String) {
        let Some((provider, key)) = self.registry.get(&tree_key) else {
            return;
        };
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (tree_key, Err(SnapshotError::Internal(e.to_string()))),
            };
            if provider.stopped() {
                return (tree_key, Ok(Fetched::Stopped));
            }
            let fetched = provider
                .get_state(&key)
                .await
                .map(|(bytes, generated)| Fetched::State(bytes, generated));
            (tree_key, fetched)
        });
    }

    /// Refresh the app state node from the block context
    fn update_app_state(&mut self, ctx: &BlockContext) -> SnapshotResult<bool> {
        let tree_key = Namespace::AppState.tree_key("all");
        let app = AppState {
            height: ctx.height,
            block: ctx.block_hash.clone(),
            time: ctx.time,
            chain_id: ctx.chain_id.clone(),
            ..self.app.clone()
        };
        let bytes = Payload::AppState(app.clone()).to_wire()?;
        if self.tree.get(tree_key.as_bytes()) == Some(bytes.as_slice()) {
            return Ok(false);
        }
        self.tree.set(tree_key.as_bytes(), bytes);
        self.app = app;
        Ok(true)
    }

    fn save_current_tree(&mut self, height: BlockHeight) -> SnapshotResult<Hash> {
        let (hash, version) = self.tree.save_version();
        self.last_hash = hash;
        self.serving = None;
        self.version_height.insert(height, version);
        self.versions.push_back(version);

        while self.versions.len() > self.config.keep_recent() {
            let Some(old) = self.versions.pop_front() else {
                break;
            };
            if let Err(e) = self.tree.delete_version(old) {
                warn!("Could not delete old version {}: {}", old, e);
            }
            self.version_height.retain(|_, v| *v != old);
            debug!("Pruned tree version {}", old);
        }

        if let Some(store) = &self.store {
            let latest = self.tree.get_immutable(version)?;
            let snapshot = Snapshot::from_tree(&latest, self.config.chunk_limits())?;
            store.save(&snapshot)?;
            store.prune(self.config.keep_recent())?;
        }
        Ok(hash)
    }

    /// Most recent saved snapshots, newest first
    pub fn list(&mut self) -> SnapshotResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for version in self.tree.available_versions().into_iter().rev().take(LIST_LIMIT) {
            let tree = self.tree.get_immutable(version)?;
            let snapshot = Snapshot::from_tree(&tree, self.config.chunk_limits())?;
            self.version_height.insert(snapshot.height, version);
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            hash: self.last_hash,
            height: self.app.height,
            chain_id: self.app.chain_id.clone(),
        }
    }

    // ============ Receiving side ============

    /// Accept a peer's offer. The first offer becomes the pending snapshot;
    /// later offers must describe exactly the same state.
    pub fn receive_snapshot(&mut self, offer: &SnapshotOffer) -> SnapshotResult<()> {
        let snapshot = Snapshot::from_offer(offer)?;
        if let Some(pending) = &self.pending {
            if pending.hash != snapshot.hash {
                return Err(SnapshotError::SnapshotHashMismatch {
                    expected: pending.hash.to_hex(),
                    actual: snapshot.hash.to_hex(),
                });
            }
            return pending.validate_meta(&snapshot);
        }
        info!(
            "Receiving snapshot at height {} ({} chunks, hash {})",
            snapshot.height, snapshot.chunks, snapshot.hash
        );
        self.pending = Some(Arc::new(snapshot));
        Ok(())
    }

    /// Give up on the pending snapshot
    pub fn reject_snapshot(&mut self) -> SnapshotResult<()> {
        self.retries += 1;
        if self.retries > self.config.retry_limit {
            return Err(SnapshotError::SnapshotRetryLimit {
                limit: self.config.retry_limit,
            });
        }
        let rejected = self.pending.take().ok_or(SnapshotError::UnknownSnapshot)?;
        warn!(
            "Rejected snapshot at height {} (attempt {}/{})",
            rejected.height, self.retries, self.config.retry_limit
        );
        Ok(())
    }

    /// The pending snapshot, shared so chunks can be delivered concurrently
    pub fn pending(&self) -> Option<Arc<Snapshot>> {
        self.pending.clone()
    }

    /// Feed one chunk to the pending snapshot, returning whether it is complete
    pub fn apply_snapshot_chunk(&self, chunk: RawChunk) -> SnapshotResult<bool> {
        let pending = self.pending.as_ref().ok_or(SnapshotError::UnknownSnapshot)?;
        pending.load_chunk(chunk)?;
        Ok(pending.ready())
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.pending.as_ref().map(|p| p.missing()).unwrap_or_default()
    }

    /// Restore state from the completed pending snapshot.
    ///
    /// On error the engine keeps its previous tree, but providers that were
    /// already handed payloads may be left partially loaded.
    pub async fn apply_snapshot(&mut self) -> SnapshotResult<()> {
        let snapshot = self.pending.clone().ok_or(SnapshotError::UnknownSnapshot)?;
        if !snapshot.ready() {
            return Err(SnapshotError::MissingChunks {
                missing: snapshot.missing(),
            });
        }
        self.restore(&snapshot).await?;
        if let Some(store) = &self.store {
            store.save(&snapshot)?;
        }
        self.pending = None;
        self.retries = 0;
        Ok(())
    }

    // ============ Serving side ============

    /// Serve chunk `index` of the local snapshot at `height`
    pub fn load_snapshot_chunk(&mut self, height: BlockHeight, format: u32, index: u32) -> SnapshotResult<RawChunk> {
        let format = SnapshotFormat::from_u32(format)?;

        let version = self.version_height.get(&height).copied();
        let cached = self
            .serving
            .as_ref()
            .filter(|s| s.height == height && Some(s.meta.version) == version)
            .cloned();
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => match version {
                Some(version) => {
                    let tree = self.tree.get_immutable(version)?;
                    let snapshot = Arc::new(Snapshot::from_tree(&tree, self.config.chunk_limits())?);
                    self.serving = Some(snapshot.clone());
                    snapshot
                }
                None => {
                    let store = self.store.as_ref().ok_or(SnapshotError::UnknownSnapshotHeight(height))?;
                    let chunk = store.chunk(height, index)?;
                    if chunk.format != format {
                        return Err(SnapshotError::SnapshotFormatMismatch);
                    }
                    return Ok(chunk);
                }
            },
        };

        if snapshot.format != format {
            return Err(SnapshotError::SnapshotFormatMismatch);
        }
        snapshot.raw_chunk(index)
    }

    // ============ Local restore ============

    /// Restore the most recent snapshot in the local store
    pub async fn load_latest(&mut self) -> SnapshotResult<Option<BlockHeight>> {
        let latest = match &self.store {
            Some(store) => store.latest_height()?,
            None => return Err(SnapshotError::Config("snapshot storage is not enabled".into())),
        };
        match latest {
            Some(height) => self.load_height(height).await.map(|_| Some(height)),
            None => Ok(None),
        }
    }

    /// Restore the snapshot stored for `height`
    pub async fn load_height(&mut self, height: BlockHeight) -> SnapshotResult<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| SnapshotError::Config("snapshot storage is not enabled".into()))?;
        let offer = store.offer(height)?;
        let snapshot = Snapshot::from_offer(&offer)?;
        for index in 0..offer.chunks {
            snapshot.load_chunk(store.chunk(height, index)?)?;
        }
        info!("Loading local snapshot at height {}", height);
        self.restore(&snapshot).await
    }

    /// Rebuild the tree from `snapshot` and dispatch payloads to providers
    async fn restore(&mut self, snapshot: &Snapshot) -> SnapshotResult<()> {
        let mut tree = MutableTree::new();
        snapshot.import_into(&mut tree)?;

        let mut ordered: BTreeMap<Namespace, Vec<Payload>> = BTreeMap::new();
        for payload in snapshot.nodes()? {
            ordered.entry(payload.namespace()).or_default().push(payload);
        }
        let app = ordered
            .get(&Namespace::AppState)
            .and_then(|p| p.first())
            .and_then(Payload::app_state)
            .cloned()
            .ok_or(SnapshotError::MissingAppStateNode)?;

        let providers = self.registry.providers().to_vec();
        for provider in &providers {
            provider.on_state_load_starts().await?;
        }

        for ns in Namespace::RESTORE_ORDER.iter().skip(1) {
            let Some(payloads) = ordered.remove(ns) else {
                continue;
            };
            for payload in payloads {
                let tree_key = payload.tree_key();
                let (provider, _) = self
                    .registry
                    .get(&tree_key)
                    .ok_or(SnapshotError::UnknownNamespace { tree_key: tree_key.clone() })?;
                debug!("Loading provider for {}", tree_key);
                let generated = provider.load_state(&payload).await?;
                for provider in generated {
                    self.registry.add(provider);
                }
            }
        }

        let providers = self.registry.providers().to_vec();
        for provider in &providers {
            provider.on_state_loaded().await?;
        }

        let version = snapshot.meta.version;
        self.tree = tree;
        self.versions = VecDeque::from([version]);
        self.version_height = BTreeMap::from([(app.height, version)]);
        self.last_hash = snapshot.hash;
        self.current = self.interval;
        self.serving = None;
        self.app = app;
        info!(
            "Restored snapshot at height {} (tree version {}, hash {})",
            self.app.height, version, self.last_hash
        );
        Ok(())
    }
}
