//! Chain nodes and the per-tenant chain cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fiscalchain_core::{BatchId, DomainError, DomainResult, TenantId};

use crate::hash::{GENESIS_HASH, record_hash};
use crate::invoice::{CanonicalPayload, RecordKind};

/// Opaque reference returned by the external signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRef(String);

impl SignatureRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SignatureRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery state of a record towards the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Unsent,
    Queued,
    Accepted,
    Rejected,
}

impl SubmissionStatus {
    /// Allowed record transitions.
    ///
    /// `Queued -> Unsent` covers both a rejected record inside a partial batch
    /// and records released from a dead batch.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Unsent, Queued) | (Queued, Accepted) | (Queued, Rejected) | (Queued, Unsent)
        )
    }
}

/// One immutable chain node.
///
/// Chain fields (payload, hashes, signature, sequence) are private and only
/// readable; the submission fields are the only mutable part and change via
/// [`InvoiceRecord::transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    tenant_id: TenantId,
    sequence_no: u64,
    kind: RecordKind,
    invoice_number: String,
    canonical_payload: String,
    hash_previous: String,
    hash_record: String,
    signature_ref: SignatureRef,
    created_at: DateTime<Utc>,
    submission_status: SubmissionStatus,
    batch_id: Option<BatchId>,
    response_code: Option<String>,
    response_message: Option<String>,
}

impl InvoiceRecord {
    /// Seal a new record on top of `tail`, computing its hash.
    pub fn seal(
        tail: &TenantChainState,
        payload: &CanonicalPayload,
        signature_ref: SignatureRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        let hash_previous = tail.last_hash.clone();
        let hash_record = record_hash(payload.as_str(), &hash_previous);
        Self {
            tenant_id: tail.tenant_id,
            sequence_no: tail.last_sequence_no + 1,
            kind: payload.kind(),
            invoice_number: payload.invoice_number().to_string(),
            canonical_payload: payload.as_str().to_string(),
            hash_previous,
            hash_record,
            signature_ref,
            created_at,
            submission_status: SubmissionStatus::Unsent,
            batch_id: None,
            response_code: None,
            response_message: None,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn sequence_no(&self) -> u64 {
        self.sequence_no
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn canonical_payload(&self) -> &str {
        &self.canonical_payload
    }

    pub fn hash_previous(&self) -> &str {
        &self.hash_previous
    }

    pub fn hash_record(&self) -> &str {
        &self.hash_record
    }

    pub fn signature_ref(&self) -> &SignatureRef {
        &self.signature_ref
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        self.submission_status
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn response_code(&self) -> Option<&str> {
        self.response_code.as_deref()
    }

    pub fn response_message(&self) -> Option<&str> {
        self.response_message.as_deref()
    }

    /// Recompute this record's digest against a given predecessor hash.
    pub fn recompute_hash(&self, hash_previous: &str) -> String {
        record_hash(&self.canonical_payload, hash_previous)
    }

    /// Move the record to `next`, updating its batch reference.
    ///
    /// `Queued` requires a batch; leaving `Queued` clears it.
    pub fn transition(
        &mut self,
        next: SubmissionStatus,
        batch_id: Option<BatchId>,
    ) -> DomainResult<()> {
        if !self.submission_status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "record {} cannot move from {:?} to {:?}",
                self.sequence_no, self.submission_status, next
            )));
        }
        match next {
            SubmissionStatus::Queued => {
                let batch_id = batch_id.ok_or_else(|| {
                    DomainError::invariant("queued record requires a batch reference")
                })?;
                self.batch_id = Some(batch_id);
            }
            _ => self.batch_id = None,
        }
        self.submission_status = next;
        Ok(())
    }

    /// Attach the authority's last verdict for this record.
    pub fn set_response(&mut self, code: Option<String>, message: Option<String>) {
        self.response_code = code;
        self.response_message = message;
    }
}

/// Per-tenant chain cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantChainState {
    pub tenant_id: TenantId,
    pub last_hash: String,
    /// `0` when the chain is empty.
    pub last_sequence_no: u64,
    pub last_batch_sent_at: Option<DateTime<Utc>>,
    /// Future batch assembly is suspended for this tenant.
    pub halted: bool,
}

impl TenantChainState {
    /// Cursor of a tenant that has never appended.
    pub fn genesis(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            last_hash: GENESIS_HASH.to_string(),
            last_sequence_no: 0,
            last_batch_sent_at: None,
            halted: false,
        }
    }

    /// Cursor after `record` has been committed on top of `self`.
    pub fn advanced_by(&self, record: &InvoiceRecord) -> Self {
        Self {
            tenant_id: self.tenant_id,
            last_hash: record.hash_record().to_string(),
            last_sequence_no: record.sequence_no(),
            last_batch_sent_at: self.last_batch_sent_at,
            halted: self.halted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_sequence_no == 0
    }
}
