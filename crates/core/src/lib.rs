//! `fiscalchain-core`: shared building blocks for the fiscal chain crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod sequence;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, TenantId};
pub use sequence::ExpectedSequence;
