//! Batch assembly under size and flow-control limits.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{debug, info};

use fiscalchain_core::TenantId;
use fiscalchain_remision::RemisionBatch;

use crate::sif_log::{SifEventKind, SifEventLog, record_event};
use crate::store::{ChainStore, StoreError};

/// Why no batch was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoneReadyReason {
    NoUnsentRecords,
    /// The previous batch of this tenant is too recent.
    FlowControl { remaining: TimeDelta },
    TenantHalted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    Ready(RemisionBatch),
    NoneReady(NoneReadyReason),
}

pub struct BatchAssembler<S> {
    store: S,
    sif_log: Arc<dyn SifEventLog>,
    flow_control: TimeDelta,
    max_records_per_batch: usize,
}

impl<S: ChainStore> BatchAssembler<S> {
    pub fn new(
        store: S,
        sif_log: Arc<dyn SifEventLog>,
        flow_control: TimeDelta,
        max_records_per_batch: usize,
    ) -> Self {
        Self {
            store,
            sif_log,
            flow_control,
            max_records_per_batch,
        }
    }

    /// Group the oldest unsent records of `tenant_id` into a new pending batch.
    ///
    /// Queuing the records, storing the batch and stamping
    /// `last_batch_sent_at = now` happen in one store commit.
    pub fn assemble(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<Assembly, StoreError> {
        let state = self.store.tenant_state(tenant_id)?;
        if state.halted {
            debug!(tenant_id = %tenant_id, "assembly skipped: tenant halted");
            return Ok(Assembly::NoneReady(NoneReadyReason::TenantHalted));
        }

        if let Some(last) = state.last_batch_sent_at {
            let elapsed = now.signed_duration_since(last);
            if elapsed < self.flow_control {
                let remaining = self.flow_control - elapsed;
                debug!(
                    tenant_id = %tenant_id,
                    remaining_ms = remaining.num_milliseconds(),
                    "assembly skipped: flow control"
                );
                return Ok(Assembly::NoneReady(NoneReadyReason::FlowControl { remaining }));
            }
        }

        let records = self
            .store
            .unsent_records(tenant_id, self.max_records_per_batch)?;
        if records.is_empty() {
            return Ok(Assembly::NoneReady(NoneReadyReason::NoUnsentRecords));
        }

        let sequence_nos: Vec<u64> = records.iter().map(|r| r.sequence_no()).collect();
        let batch = RemisionBatch::new(tenant_id, sequence_nos, self.max_records_per_batch, now)?;
        self.store.commit_batch(&batch, now)?;

        info!(
            tenant_id = %tenant_id,
            batch_id = %batch.batch_id(),
            records = batch.len(),
            "batch created"
        );
        record_event(
            self.sif_log.as_ref(),
            tenant_id,
            SifEventKind::BatchCreate,
            now,
            json!({
                "batch_id": batch.batch_id(),
                "first_sequence_no": batch.record_sequence_nos().first(),
                "last_sequence_no": batch.record_sequence_nos().last(),
                "records": batch.len(),
            }),
        );

        Ok(Assembly::Ready(batch))
    }

    /// Stop creating batches for `tenant_id`. Open batches keep running.
    pub fn halt(&self, tenant_id: TenantId) -> Result<(), StoreError> {
        self.store.set_halted(tenant_id, true)?;
        info!(tenant_id = %tenant_id, "batch assembly halted");
        Ok(())
    }

    pub fn resume(&self, tenant_id: TenantId) -> Result<(), StoreError> {
        self.store.set_halted(tenant_id, false)?;
        info!(tenant_id = %tenant_id, "batch assembly resumed");
        Ok(())
    }
}
