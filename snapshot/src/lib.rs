//! Vellum Snapshot Engine
//!
//! Turns a saved version of the state tree into a chunked, hash-verified
//! snapshot, serves it to peers, and rebuilds an identical tree (and
//! provider state) from a snapshot received chunk by chunk.

pub mod payload;
pub mod types;
pub mod snapshot;
pub mod collector;
pub mod chunker;
pub mod builder;
pub mod restore;
pub mod provider;
pub mod store;
pub mod engine;

pub use payload::*;
pub use types::*;
pub use snapshot::Snapshot;
pub use collector::CollectState;
pub use chunker::Chunked;
pub use provider::{Generated, ProviderRegistry, StateProvider};
pub use store::SnapshotStore;
pub use engine::{SnapshotEngine, SnapshotInfo};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::payload::{AppState, Payload};
    use vellum_state::{ImmutableTree, MutableTree};

    /// Saved tree holding an app state at height 10 plus `payloads`
    pub fn tree_with(payloads: Vec<Payload>) -> ImmutableTree {
        let mut tree = MutableTree::new();
        let app = Payload::AppState(AppState {
            height: 10,
            block: "0xblock".into(),
            time: 1,
            chain_id: "testnet".into(),
            protocol_version: "0.1.0".into(),
            protocol_upgrade: false,
        });
        for payload in std::iter::once(app).chain(payloads) {
            tree.set(payload.tree_key().as_bytes(), payload.to_wire().unwrap());
        }
        tree.save_version();
        tree.latest().unwrap()
    }
}
