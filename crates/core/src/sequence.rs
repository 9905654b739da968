//! Optimistic concurrency on a tenant's chain position.

use crate::error::{DomainError, DomainResult};

/// Expected chain tail for a compare-and-swap commit.
///
/// The chain store compares this against the tenant's `last_sequence_no`
/// before committing an append, so a writer that read a stale tail can never
/// fork the chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedSequence {
    /// Skip the check (migrations, test fixtures).
    Any,
    /// The tenant has no records yet.
    Empty,
    /// The tenant's last committed record has exactly this sequence number.
    Exact(u64),
}

impl ExpectedSequence {
    /// Build the expectation from an observed tail (`0` means empty).
    pub fn from_last(last_sequence_no: u64) -> Self {
        if last_sequence_no == 0 {
            Self::Empty
        } else {
            Self::Exact(last_sequence_no)
        }
    }

    pub fn matches(self, actual_last: u64) -> bool {
        match self {
            ExpectedSequence::Any => true,
            ExpectedSequence::Empty => actual_last == 0,
            ExpectedSequence::Exact(v) => v == actual_last,
        }
    }

    pub fn check(self, actual_last: u64) -> DomainResult<()> {
        if self.matches(actual_last) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "chain position check failed (expected: {self:?}, actual last: {actual_last})"
            )))
        }
    }
}
