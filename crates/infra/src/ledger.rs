//! Chain ledger: the only writer of chain records.
//!
//! `append` reads the tenant cursor, seals the next record and commits both
//! in one store call. A per-tenant mutex serializes appends of one tenant;
//! the store's chain-position check rejects anything that still slips past
//! it (another process, a stale cursor).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use fiscalchain_core::{ExpectedSequence, TenantId};
use fiscalchain_ledger::{
    CanonicalPayload, InvoiceRecord, RecordKind, SignatureRef, TenantChainState,
};

use crate::sif_log::{SifEventKind, SifEventLog, record_event};
use crate::store::{ChainStore, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("append lock poisoned for tenant {0}")]
    LockPoisoned(TenantId),
}

/// A signed payload ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub payload: CanonicalPayload,
    pub signature_ref: SignatureRef,
}

pub struct ChainLedger<S> {
    store: S,
    sif_log: Arc<dyn SifEventLog>,
    tenant_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl<S: ChainStore> ChainLedger<S> {
    pub fn new(store: S, sif_log: Arc<dyn SifEventLog>) -> Self {
        Self {
            store,
            sif_log,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant_id: TenantId) -> Result<Arc<Mutex<()>>, LedgerError> {
        let mut locks = self
            .tenant_locks
            .lock()
            .map_err(|_| LedgerError::LockPoisoned(tenant_id))?;
        Ok(locks.entry(tenant_id).or_default().clone())
    }

    /// Append the next record of `tenant_id` and return it.
    ///
    /// On any error nothing is visible: no record, no cursor change.
    pub fn append(
        &self,
        tenant_id: TenantId,
        payload: &CanonicalPayload,
        signature_ref: SignatureRef,
    ) -> Result<InvoiceRecord, LedgerError> {
        let lock = self.tenant_lock(tenant_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| LedgerError::LockPoisoned(tenant_id))?;

        let tail = self.store.tenant_state(tenant_id)?;
        let record = InvoiceRecord::seal(&tail, payload, signature_ref, Utc::now());
        debug!(
            tenant_id = %tenant_id,
            sequence_no = record.sequence_no(),
            "sealed record"
        );

        self.store.commit_append(
            record.clone(),
            ExpectedSequence::from_last(tail.last_sequence_no),
        )?;

        info!(
            tenant_id = %tenant_id,
            sequence_no = record.sequence_no(),
            invoice_number = record.invoice_number(),
            kind = record.kind().as_str(),
            "record appended"
        );

        let kind = match record.kind() {
            RecordKind::Alta => SifEventKind::RecordCreate,
            RecordKind::Anulacion => SifEventKind::RecordCancel,
        };
        record_event(
            self.sif_log.as_ref(),
            tenant_id,
            kind,
            record.created_at(),
            json!({
                "sequence_no": record.sequence_no(),
                "invoice_number": record.invoice_number(),
                "hash_record": record.hash_record(),
            }),
        );

        Ok(record)
    }

    pub fn append_record(
        &self,
        tenant_id: TenantId,
        draft: RecordDraft,
    ) -> Result<InvoiceRecord, LedgerError> {
        self.append(tenant_id, &draft.payload, draft.signature_ref)
    }

    pub fn chain_state(&self, tenant_id: TenantId) -> Result<TenantChainState, LedgerError> {
        Ok(self.store.tenant_state(tenant_id)?)
    }

    pub fn load_chain(&self, tenant_id: TenantId) -> Result<Vec<InvoiceRecord>, LedgerError> {
        Ok(self.store.load_chain(tenant_id)?)
    }
}
