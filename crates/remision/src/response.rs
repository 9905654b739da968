//! Authority responses and their classification into a batch outcome.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchStatus;

/// Per-record verdict returned by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeatResponse {
    pub record_sequence_no: u64,
    pub accepted: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl AeatResponse {
    pub fn accepted(record_sequence_no: u64) -> Self {
        Self {
            record_sequence_no,
            accepted: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn rejected(
        record_sequence_no: u64,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            record_sequence_no,
            accepted: false,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }
}

/// A response that does not line up one-to-one with the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseMismatch {
    #[error("no verdict for record {0}")]
    Missing(u64),
    #[error("verdict for record {0} which is not part of the batch")]
    Unexpected(u64),
    #[error("more than one verdict for record {0}")]
    Duplicate(u64),
}

/// Per-record outcomes of a batch, split by verdict, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedResponse {
    pub status: BatchStatus,
    pub accepted: Vec<AeatResponse>,
    pub rejected: Vec<AeatResponse>,
}

/// Match `responses` against the batch's records and derive the batch status.
///
/// Per-record verdicts are authoritative and independent: all accepted →
/// `Accepted`, all rejected → `Rejected`, otherwise `Partial`.
pub fn classify_responses(
    batch_records: &[u64],
    responses: &[AeatResponse],
) -> Result<ClassifiedResponse, ResponseMismatch> {
    let expected: BTreeSet<u64> = batch_records.iter().copied().collect();
    let mut by_sequence: BTreeMap<u64, &AeatResponse> = BTreeMap::new();

    for response in responses {
        let seq = response.record_sequence_no;
        if !expected.contains(&seq) {
            return Err(ResponseMismatch::Unexpected(seq));
        }
        if by_sequence.insert(seq, response).is_some() {
            return Err(ResponseMismatch::Duplicate(seq));
        }
    }

    if let Some(missing) = expected.iter().find(|seq| !by_sequence.contains_key(*seq)) {
        return Err(ResponseMismatch::Missing(*missing));
    }

    let (accepted, rejected): (Vec<AeatResponse>, Vec<AeatResponse>) = by_sequence
        .into_values()
        .cloned()
        .partition(|r| r.accepted);

    let status = match (accepted.is_empty(), rejected.is_empty()) {
        (false, true) => BatchStatus::Accepted,
        (true, false) => BatchStatus::Rejected,
        _ => BatchStatus::Partial,
    };

    Ok(ClassifiedResponse {
        status,
        accepted,
        rejected,
    })
}
