//! Integrity verifier: replays a stored chain and reports the first break.
//!
//! Read-only. A broken chain is surfaced (alert + SIF event), never repaired.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use fiscalchain_core::TenantId;
use fiscalchain_ledger::{ChainBreak, IntegrityCheckResult, IntegrityStatus};

use crate::collaborators::{AlertReason, AlertSink};
use crate::sif_log::{SifEventKind, SifEventLog, record_event};
use crate::store::{ChainStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chain of tenant {tenant_id} broken at sequence {broken_at_sequence_no}: {chain_break}")]
pub struct ChainIntegrityError {
    pub tenant_id: TenantId,
    pub broken_at_sequence_no: u64,
    pub chain_break: ChainBreak,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broken(#[from] ChainIntegrityError),
}

pub struct IntegrityVerifier<S> {
    store: S,
    alerts: Arc<dyn AlertSink>,
    sif_log: Arc<dyn SifEventLog>,
}

impl<S: ChainStore> IntegrityVerifier<S> {
    pub fn new(store: S, alerts: Arc<dyn AlertSink>, sif_log: Arc<dyn SifEventLog>) -> Self {
        Self {
            store,
            alerts,
            sif_log,
        }
    }

    pub async fn check(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<IntegrityCheckResult, StoreError> {
        let records = self.store.load_chain(tenant_id)?;
        let result = IntegrityCheckResult::evaluate(tenant_id, &records, now);

        record_event(
            self.sif_log.as_ref(),
            tenant_id,
            SifEventKind::IntegrityCheck,
            now,
            json!({
                "status": result.status,
                "records_checked": result.records_checked,
                "broken_at_sequence_no": result.broken_at_sequence_no,
            }),
        );

        match (&result.status, &result.chain_break) {
            (IntegrityStatus::Broken, Some(chain_break)) => {
                let broken_at = chain_break.sequence_no();
                error!(
                    tenant_id = %tenant_id,
                    broken_at_sequence_no = broken_at,
                    detail = %chain_break,
                    "chain integrity broken"
                );
                record_event(
                    self.sif_log.as_ref(),
                    tenant_id,
                    SifEventKind::IntegrityBroken,
                    now,
                    json!({
                        "broken_at_sequence_no": broken_at,
                        "chain_break": chain_break,
                    }),
                );
                self.alerts
                    .notify(
                        tenant_id,
                        AlertReason::IntegrityBroken {
                            broken_at_sequence_no: broken_at,
                            detail: chain_break.to_string(),
                        },
                    )
                    .await;
            }
            _ => info!(
                tenant_id = %tenant_id,
                status = ?result.status,
                records_checked = result.records_checked,
                "chain integrity checked"
            ),
        }

        Ok(result)
    }

    /// Like [`check`](Self::check), but a broken chain is an error.
    pub async fn ensure_intact(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<IntegrityCheckResult, VerifyError> {
        let result = self.check(tenant_id, now).await?;
        match (result.broken_at_sequence_no, &result.chain_break) {
            (Some(broken_at_sequence_no), Some(chain_break)) => Err(ChainIntegrityError {
                tenant_id,
                broken_at_sequence_no,
                chain_break: chain_break.clone(),
            }
            .into()),
            _ => Ok(result),
        }
    }
}
