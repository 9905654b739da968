//! Remision batch and its lifecycle.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use fiscalchain_core::{BatchId, DomainError, DomainResult, TenantId};

use crate::response::ClassifiedResponse;
use crate::retry::RetryPolicy;

/// Batch lifecycle.
///
/// ```text
/// pending -> sending -> { accepted | partial | rejected | dead }
///               ^  |
///               +--+  (scheduled retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Sending,
    Accepted,
    Partial,
    Rejected,
    Dead,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Accepted | BatchStatus::Partial | BatchStatus::Rejected | BatchStatus::Dead
        )
    }

    /// Single place where legal transitions are defined.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Sending, Sending)
                | (Sending, Accepted)
                | (Sending, Partial)
                | (Sending, Rejected)
                | (Sending, Dead)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Sending => "sending",
            BatchStatus::Accepted => "accepted",
            BatchStatus::Partial => "partial",
            BatchStatus::Rejected => "rejected",
            BatchStatus::Dead => "dead",
        }
    }
}

/// What happens to a batch after a failed transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still `sending`; try again with the same batch id at this instant.
    RetryAt(DateTime<Utc>),
    /// Retries exhausted; the batch is now `dead`.
    Dead,
}

/// A submission unit: an ordered run of one tenant's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemisionBatch {
    batch_id: BatchId,
    tenant_id: TenantId,
    record_sequence_nos: Vec<u64>,
    status: BatchStatus,
    attempt_count: u32,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    responded_at: Option<DateTime<Utc>>,
    accepted_count: usize,
    rejected_count: usize,
    last_error: Option<String>,
    /// Bumped on every status transition; stores compare it before writing.
    #[serde(default)]
    revision: u64,
}

impl RemisionBatch {
    /// Create a `pending` batch.
    ///
    /// Records must be non-empty, strictly ascending and at most
    /// `max_records` long.
    pub fn new(
        tenant_id: TenantId,
        record_sequence_nos: Vec<u64>,
        max_records: usize,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if record_sequence_nos.is_empty() {
            return Err(DomainError::validation("batch must contain at least one record"));
        }
        if record_sequence_nos.len() > max_records {
            return Err(DomainError::invariant(format!(
                "batch of {} records exceeds the ceiling of {max_records}",
                record_sequence_nos.len()
            )));
        }
        if record_sequence_nos.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DomainError::invariant(
                "batch records must be strictly ascending by sequence",
            ));
        }

        Ok(Self {
            batch_id: BatchId::new(),
            tenant_id,
            record_sequence_nos,
            status: BatchStatus::Pending,
            attempt_count: 0,
            next_retry_at: None,
            created_at,
            sent_at: None,
            responded_at: None,
            accepted_count: 0,
            rejected_count: 0,
            last_error: None,
            revision: 0,
        })
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn record_sequence_nos(&self) -> &[u64] {
        &self.record_sequence_nos
    }

    pub fn len(&self) -> usize {
        self.record_sequence_nos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_sequence_nos.is_empty()
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn responded_at(&self) -> Option<DateTime<Utc>> {
        self.responded_at
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_count
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of status transitions applied since creation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the batch may be (re)submitted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            BatchStatus::Pending => true,
            BatchStatus::Sending => self.next_retry_at.is_none_or(|at| now >= at),
            _ => false,
        }
    }

    fn transition_to(&mut self, next: BatchStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "batch {} cannot move from {} to {}",
                self.batch_id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.revision += 1;
        Ok(())
    }

    /// Enter `sending` for a new attempt.
    pub fn mark_sending(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition_to(BatchStatus::Sending)?;
        self.sent_at = Some(now);
        self.next_retry_at = None;
        Ok(())
    }

    /// Apply a classified authority response.
    pub fn record_response(
        &mut self,
        response: &ClassifiedResponse,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.transition_to(response.status)?;
        self.accepted_count = response.accepted.len();
        self.rejected_count = response.rejected.len();
        self.responded_at = Some(now);
        self.next_retry_at = None;
        self.last_error = None;
        Ok(())
    }

    /// Count a failed transport attempt and decide between retry and `dead`.
    ///
    /// `attempt_count` is incremented first; the batch dies once it exceeds
    /// `policy.max_retries`.
    pub fn record_transport_failure(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<FailureDisposition> {
        if self.status != BatchStatus::Sending {
            return Err(DomainError::invariant(format!(
                "batch {} is {} and cannot record a transport failure",
                self.batch_id,
                self.status.as_str()
            )));
        }

        self.attempt_count += 1;
        self.last_error = Some(error.into());

        if !policy.should_retry(self.attempt_count) {
            self.transition_to(BatchStatus::Dead)?;
            self.next_retry_at = None;
            return Ok(FailureDisposition::Dead);
        }

        let delay = TimeDelta::from_std(policy.delay_for_attempt(self.attempt_count))
            .unwrap_or(TimeDelta::MAX);
        let retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.transition_to(BatchStatus::Sending)?;
        self.next_retry_at = Some(retry_at);
        Ok(FailureDisposition::RetryAt(retry_at))
    }
}
