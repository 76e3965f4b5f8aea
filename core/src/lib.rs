//! Vellum Core Library
//! 
//! Shared types, the snapshot error taxonomy, and configuration used by
//! every other Vellum crate.

pub mod types;
pub mod error;
pub mod config;

pub use types::*;
pub use error::*;
pub use config::*;
