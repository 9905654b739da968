//! Chain store boundary.
//!
//! Persistence technology is external: this module defines what the ledger,
//! assembler and orchestrator need from storage, plus an in-memory
//! implementation for tests and development.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryChainStore;
pub use r#trait::{ChainStore, RemisionStats, StoreError};
