//! Fiscal chain domain module.
//!
//! Canonical invoice payloads, hash linkage and chain verification, implemented
//! purely as deterministic domain logic (no IO, no storage, no clocks).

pub mod hash;
pub mod integrity;
pub mod invoice;
pub mod record;

pub use hash::{GENESIS_HASH, record_hash};
pub use integrity::{ChainBreak, IntegrityCheckResult, IntegrityStatus, verify_chain};
pub use invoice::{CanonicalPayload, InvoiceData, RecordKind};
pub use record::{InvoiceRecord, SignatureRef, SubmissionStatus, TenantChainState};
