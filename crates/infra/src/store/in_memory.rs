use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use fiscalchain_core::{BatchId, ExpectedSequence, TenantId};
use fiscalchain_ledger::{InvoiceRecord, SubmissionStatus, TenantChainState};
use fiscalchain_remision::{AeatResponse, BatchStatus, ClassifiedResponse, RemisionBatch};

use super::r#trait::{ChainStore, RemisionStats, StoreError};

#[derive(Debug, Clone)]
struct TenantChain {
    state: TenantChainState,
    records: Vec<InvoiceRecord>,
    batches: Vec<RemisionBatch>,
}

impl TenantChain {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            state: TenantChainState::genesis(tenant_id),
            records: Vec::new(),
            batches: Vec::new(),
        }
    }

    fn record_index(&self, sequence_no: u64) -> Result<usize, StoreError> {
        self.records
            .binary_search_by_key(&sequence_no, InvoiceRecord::sequence_no)
            .map_err(|_| {
                StoreError::NotFound(format!(
                    "record {sequence_no} of tenant {}",
                    self.state.tenant_id
                ))
            })
    }

    fn batch_index(&self, batch_id: BatchId) -> Option<usize> {
        self.batches.iter().position(|b| b.batch_id() == batch_id)
    }

    /// Index of the stored copy of `batch`, provided it is still open and at
    /// `expected_revision`.
    fn writable_batch_index(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<usize, StoreError> {
        let idx = self
            .batch_index(batch.batch_id())
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch.batch_id())))?;
        let stored = &self.batches[idx];
        if stored.status().is_terminal() {
            return Err(StoreError::Concurrency(format!(
                "batch {} is already {}",
                batch.batch_id(),
                stored.status().as_str()
            )));
        }
        if stored.revision() != expected_revision {
            return Err(StoreError::Concurrency(format!(
                "batch {} is at revision {}, expected {expected_revision}",
                batch.batch_id(),
                stored.revision()
            )));
        }
        Ok(idx)
    }

    /// Clone the record at `sequence_no`, check it is queued in `batch` and
    /// move the clone to `next`. Nothing is written back here.
    fn stage_transition(
        &self,
        batch: &RemisionBatch,
        response: &AeatResponse,
        next: SubmissionStatus,
    ) -> Result<(usize, InvoiceRecord), StoreError> {
        let idx = self.record_index(response.record_sequence_no)?;
        let mut record = self.records[idx].clone();
        if record.batch_id() != Some(batch.batch_id()) {
            return Err(StoreError::Concurrency(format!(
                "record {} is not queued in batch {}",
                record.sequence_no(),
                batch.batch_id()
            )));
        }
        record.transition(next, None)?;
        record.set_response(response.error_code.clone(), response.error_message.clone());
        Ok((idx, record))
    }
}

/// In-memory chain store.
///
/// One lock guards every tenant, so each commit is trivially atomic.
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryChainStore {
    tenants: RwLock<HashMap<TenantId, TenantChain>>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TenantId, TenantChain>>, StoreError> {
        self.tenants
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantId, TenantChain>>, StoreError> {
        self.tenants
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    /// Rewrite a persisted record field behind the ledger's back.
    #[cfg(test)]
    pub(crate) fn tamper_record(
        &self,
        tenant_id: TenantId,
        sequence_no: u64,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))?;
        let idx = chain.record_index(sequence_no)?;
        let mut json = serde_json::to_value(&chain.records[idx])
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        json[field] = value;
        chain.records[idx] =
            serde_json::from_value(json).map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Drop a persisted record, leaving a hole in the chain.
    #[cfg(test)]
    pub(crate) fn delete_record(
        &self,
        tenant_id: TenantId,
        sequence_no: u64,
    ) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))?;
        let idx = chain.record_index(sequence_no)?;
        chain.records.remove(idx);
        Ok(())
    }
}

impl ChainStore for InMemoryChainStore {
    fn tenant_state(&self, tenant_id: TenantId) -> Result<TenantChainState, StoreError> {
        let tenants = self.read()?;
        Ok(tenants
            .get(&tenant_id)
            .map(|c| c.state.clone())
            .unwrap_or_else(|| TenantChainState::genesis(tenant_id)))
    }

    fn commit_append(
        &self,
        record: InvoiceRecord,
        expected: ExpectedSequence,
    ) -> Result<TenantChainState, StoreError> {
        let tenant_id = record.tenant_id();
        let mut tenants = self.write()?;
        let chain = tenants
            .entry(tenant_id)
            .or_insert_with(|| TenantChain::new(tenant_id));

        let current = chain.state.last_sequence_no;
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }
        if record.sequence_no() != current + 1 {
            return Err(StoreError::Concurrency(format!(
                "record {} does not follow chain tail {current}",
                record.sequence_no()
            )));
        }
        if record.hash_previous() != chain.state.last_hash {
            return Err(StoreError::Concurrency(format!(
                "record {} does not link to the chain tail",
                record.sequence_no()
            )));
        }

        chain.state = chain.state.advanced_by(&record);
        chain.records.push(record);
        Ok(chain.state.clone())
    }

    fn load_chain(&self, tenant_id: TenantId) -> Result<Vec<InvoiceRecord>, StoreError> {
        let tenants = self.read()?;
        Ok(tenants
            .get(&tenant_id)
            .map(|c| c.records.clone())
            .unwrap_or_default())
    }

    fn records(
        &self,
        tenant_id: TenantId,
        sequence_nos: &[u64],
    ) -> Result<Vec<InvoiceRecord>, StoreError> {
        let tenants = self.read()?;
        let chain = tenants
            .get(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))?;
        sequence_nos
            .iter()
            .map(|&seq| chain.record_index(seq).map(|idx| chain.records[idx].clone()))
            .collect()
    }

    fn unsent_records(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>, StoreError> {
        let tenants = self.read()?;
        Ok(tenants
            .get(&tenant_id)
            .map(|c| {
                c.records
                    .iter()
                    .filter(|r| r.submission_status() == SubmissionStatus::Unsent)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn commit_batch(&self, batch: &RemisionBatch, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&batch.tenant_id())
            .ok_or_else(|| StoreError::NotFound(format!("tenant {}", batch.tenant_id())))?;

        if chain.batch_index(batch.batch_id()).is_some() {
            return Err(StoreError::Concurrency(format!(
                "batch {} already exists",
                batch.batch_id()
            )));
        }

        // Stage every record first so a failure leaves nothing half-queued.
        let mut staged = Vec::with_capacity(batch.len());
        for &seq in batch.record_sequence_nos() {
            let idx = chain.record_index(seq)?;
            let mut record = chain.records[idx].clone();
            if record.submission_status() != SubmissionStatus::Unsent {
                return Err(StoreError::Concurrency(format!(
                    "record {seq} is {:?}, not unsent",
                    record.submission_status()
                )));
            }
            record.transition(SubmissionStatus::Queued, Some(batch.batch_id()))?;
            staged.push((idx, record));
        }

        for (idx, record) in staged {
            chain.records[idx] = record;
        }
        chain.state.last_batch_sent_at = Some(now);
        chain.batches.push(batch.clone());
        Ok(())
    }

    fn get_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
    ) -> Result<Option<RemisionBatch>, StoreError> {
        let tenants = self.read()?;
        if let Some(batch) = tenants
            .get(&tenant_id)
            .and_then(|c| c.batch_index(batch_id).map(|idx| c.batches[idx].clone()))
        {
            return Ok(Some(batch));
        }

        let owned_elsewhere = tenants
            .iter()
            .any(|(t, c)| *t != tenant_id && c.batch_index(batch_id).is_some());
        if owned_elsewhere {
            return Err(StoreError::TenantIsolation(format!(
                "batch {batch_id} does not belong to tenant {tenant_id}"
            )));
        }
        Ok(None)
    }

    fn update_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&batch.tenant_id())
            .ok_or_else(|| StoreError::NotFound(format!("tenant {}", batch.tenant_id())))?;
        let idx = chain.writable_batch_index(batch, expected_revision)?;
        chain.batches[idx] = batch.clone();
        Ok(())
    }

    fn commit_outcome(
        &self,
        batch: &RemisionBatch,
        classified: &ClassifiedResponse,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&batch.tenant_id())
            .ok_or_else(|| StoreError::NotFound(format!("tenant {}", batch.tenant_id())))?;
        let batch_idx = chain.writable_batch_index(batch, expected_revision)?;

        let rejected_target = match batch.status() {
            BatchStatus::Rejected => SubmissionStatus::Rejected,
            BatchStatus::Partial | BatchStatus::Accepted => SubmissionStatus::Unsent,
            other => {
                return Err(StoreError::Concurrency(format!(
                    "batch {} is {}, not a response outcome",
                    batch.batch_id(),
                    other.as_str()
                )));
            }
        };

        let mut staged = Vec::with_capacity(classified.accepted.len() + classified.rejected.len());
        for response in &classified.accepted {
            staged.push(chain.stage_transition(batch, response, SubmissionStatus::Accepted)?);
        }
        for response in &classified.rejected {
            staged.push(chain.stage_transition(batch, response, rejected_target)?);
        }

        for (idx, record) in staged {
            chain.records[idx] = record;
        }
        chain.batches[batch_idx] = batch.clone();
        Ok(())
    }

    fn release_batch(
        &self,
        batch: &RemisionBatch,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        let chain = tenants
            .get_mut(&batch.tenant_id())
            .ok_or_else(|| StoreError::NotFound(format!("tenant {}", batch.tenant_id())))?;
        let batch_idx = chain.writable_batch_index(batch, expected_revision)?;

        let mut staged = Vec::with_capacity(batch.len());
        for &seq in batch.record_sequence_nos() {
            let idx = chain.record_index(seq)?;
            let record = &chain.records[idx];
            if record.batch_id() != Some(batch.batch_id()) {
                continue;
            }
            let mut record = record.clone();
            record.transition(SubmissionStatus::Unsent, None)?;
            staged.push((idx, record));
        }

        for (idx, record) in staged {
            chain.records[idx] = record;
        }
        chain.batches[batch_idx] = batch.clone();
        Ok(())
    }

    fn batches(&self, tenant_id: TenantId) -> Result<Vec<RemisionBatch>, StoreError> {
        let tenants = self.read()?;
        Ok(tenants
            .get(&tenant_id)
            .map(|c| c.batches.clone())
            .unwrap_or_default())
    }

    fn tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let tenants = self.read()?;
        let mut ids: Vec<TenantId> = tenants.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn set_halted(&self, tenant_id: TenantId, halted: bool) -> Result<(), StoreError> {
        let mut tenants = self.write()?;
        tenants
            .entry(tenant_id)
            .or_insert_with(|| TenantChain::new(tenant_id))
            .state
            .halted = halted;
        Ok(())
    }

    fn stats(&self, tenant_id: TenantId) -> Result<RemisionStats, StoreError> {
        let tenants = self.read()?;
        let mut stats = RemisionStats::default();
        let Some(chain) = tenants.get(&tenant_id) else {
            return Ok(stats);
        };

        for batch in &chain.batches {
            match batch.status() {
                BatchStatus::Pending => stats.pending += 1,
                BatchStatus::Sending => stats.sending += 1,
                BatchStatus::Accepted => stats.accepted += 1,
                BatchStatus::Partial => stats.partial += 1,
                BatchStatus::Rejected => stats.rejected += 1,
                BatchStatus::Dead => stats.dead += 1,
            }
        }
        for record in &chain.records {
            match record.submission_status() {
                SubmissionStatus::Unsent => stats.unsent_records += 1,
                SubmissionStatus::Queued => stats.queued_records += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}
