//! Remision (submission) domain module.
//!
//! Batch lifecycle, retry policy and authority response classification,
//! implemented as deterministic domain logic. Callers pass `now` explicitly;
//! nothing in here reads a clock or performs IO.

pub mod batch;
pub mod response;
pub mod retry;

pub use batch::{BatchStatus, FailureDisposition, RemisionBatch};
pub use response::{AeatResponse, ClassifiedResponse, ResponseMismatch, classify_responses};
pub use retry::RetryPolicy;
