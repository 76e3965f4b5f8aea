//! Vellum State Tree
//!
//! A versioned, immutable, Merkle-hashed AVL tree. Every saved version is
//! addressable by its root hash and can be exported node by node and
//! imported back into an identical tree.

pub mod node;
pub mod tree;
pub mod export;
pub mod import;

pub use node::Node;
pub use tree::*;
pub use export::*;
pub use import::*;
