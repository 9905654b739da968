use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use fiscalchain_core::{BatchId, DomainError, ExpectedSequence, TenantId};
use fiscalchain_ledger::{InvoiceRecord, TenantChainState};
use fiscalchain_remision::{ClassifiedResponse, RemisionBatch};

/// Chain store operation error.
///
/// These are infrastructure errors (storage, concurrency, isolation) as
/// opposed to domain errors, which are wrapped when a commit would break a
/// record or batch invariant.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The expected chain position (or record state) is stale.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-tenant submission counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemisionStats {
    pub pending: usize,
    pub sending: usize,
    pub accepted: usize,
    pub partial: usize,
    pub rejected: usize,
    pub dead: usize,
    pub unsent_records: usize,
    pub queued_records: usize,
}

/// Tenant-scoped storage for chain records, cursors and remision batches.
///
/// ## Atomicity
///
/// Every `commit_*` / `release_*` call is one atomic unit: either all of its
/// writes become visible or none do. In particular:
///
/// - `commit_append` writes the record and advances the tenant cursor together,
///   and rejects the commit when the cursor moved since it was read
/// - `commit_batch` marks the records `queued`, stamps `last_batch_sent_at`
///   and stores the batch together
/// - `commit_outcome` / `release_batch` update the batch and its records together
///
/// ## Ordering
///
/// Records are returned ascending by sequence number, batches in creation order.
pub trait ChainStore: Send + Sync {
    /// Current cursor; genesis state for a tenant that never appended.
    fn tenant_state(&self, tenant_id: TenantId) -> Result<TenantChainState, StoreError>;

    /// Persist `record` and advance the cursor, checking `expected` first.
    fn commit_append(
        &self,
        record: InvoiceRecord,
        expected: ExpectedSequence,
    ) -> Result<TenantChainState, StoreError>;

    /// Full stored chain of a tenant.
    fn load_chain(&self, tenant_id: TenantId) -> Result<Vec<InvoiceRecord>, StoreError>;

    /// Records with the given sequence numbers, in the given order.
    fn records(
        &self,
        tenant_id: TenantId,
        sequence_nos: &[u64],
    ) -> Result<Vec<InvoiceRecord>, StoreError>;

    /// Oldest `unsent` records, at most `limit`.
    fn unsent_records(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>, StoreError>;

    /// Store a new `pending` batch, queue its records and stamp `now` as the
    /// tenant's `last_batch_sent_at`.
    fn commit_batch(&self, batch: &RemisionBatch, now: DateTime<Utc>) -> Result<(), StoreError>;

    fn get_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
    ) -> Result<Option<RemisionBatch>, StoreError>;

    /// Overwrite the stored state of an open batch.
    ///
    /// Fails with `Concurrency` when the stored copy is final or no longer at
    /// `expected_revision`. The same check guards `commit_outcome` and
    /// `release_batch`.
    fn update_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError>;

    /// Store a batch that reached a response outcome and move its records.
    ///
    /// Accepted records become `accepted`. Rejected records become `rejected`
    /// when the whole batch was rejected and return to `unsent` when it was
    /// partial.
    fn commit_outcome(
        &self,
        batch: &RemisionBatch,
        classified: &ClassifiedResponse,
        expected_revision: u64,
    ) -> Result<(), StoreError>;

    /// Store a `dead` batch and return its queued records to `unsent`.
    fn release_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError>;

    /// All batches of a tenant in creation order.
    fn batches(&self, tenant_id: TenantId) -> Result<Vec<RemisionBatch>, StoreError>;

    /// Tenants known to the store.
    fn tenants(&self) -> Result<Vec<TenantId>, StoreError>;

    fn set_halted(&self, tenant_id: TenantId, halted: bool) -> Result<(), StoreError>;

    fn stats(&self, tenant_id: TenantId) -> Result<RemisionStats, StoreError>;
}

impl<S> ChainStore for Arc<S>
where
    S: ChainStore + ?Sized,
{
    fn tenant_state(&self, tenant_id: TenantId) -> Result<TenantChainState, StoreError> {
        (**self).tenant_state(tenant_id)
    }

    fn commit_append(
        &self,
        record: InvoiceRecord,
        expected: ExpectedSequence,
    ) -> Result<TenantChainState, StoreError> {
        (**self).commit_append(record, expected)
    }

    fn load_chain(&self, tenant_id: TenantId) -> Result<Vec<InvoiceRecord>, StoreError> {
        (**self).load_chain(tenant_id)
    }

    fn records(
        &self,
        tenant_id: TenantId,
        sequence_nos: &[u64],
    ) -> Result<Vec<InvoiceRecord>, StoreError> {
        (**self).records(tenant_id, sequence_nos)
    }

    fn unsent_records(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>, StoreError> {
        (**self).unsent_records(tenant_id, limit)
    }

    fn commit_batch(&self, batch: &RemisionBatch, now: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).commit_batch(batch, now)
    }

    fn get_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
    ) -> Result<Option<RemisionBatch>, StoreError> {
        (**self).get_batch(tenant_id, batch_id)
    }

    fn update_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        (**self).update_batch(batch, expected_revision)
    }

    fn commit_outcome(
        &self,
        batch: &RemisionBatch,
        classified: &ClassifiedResponse,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        (**self).commit_outcome(batch, classified, expected_revision)
    }

    fn release_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        (**self).release_batch(batch, expected_revision)
    }

    fn batches(&self, tenant_id: TenantId) -> Result<Vec<RemisionBatch>, StoreError> {
        (**self).batches(tenant_id)
    }

    fn tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        (**self).tenants()
    }

    fn set_halted(&self, tenant_id: TenantId, halted: bool) -> Result<(), StoreError> {
        (**self).set_halted(tenant_id, halted)
    }

    fn stats(&self, tenant_id: TenantId) -> Result<RemisionStats, StoreError> {
        (**self).stats(tenant_id)
    }
}
