//! Vellum Cryptography Module
//! 
//! Hashing used across the snapshot subsystem:
//! - SHA-256 for content hashes (payload values and transferred chunks)
//! - BLAKE3 for tree node hashes

pub mod hashing;

pub use hashing::*;
