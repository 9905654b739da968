//! Record factory and the issue pipeline (build + append).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use fiscalchain_core::{DomainError, TenantId};
use fiscalchain_ledger::{InvoiceData, InvoiceRecord};

use crate::collaborators::{Signer, SigningError};
use crate::ledger::{ChainLedger, LedgerError, RecordDraft};
use crate::store::ChainStore;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Turns raw invoice data into a signed canonical payload.
pub struct RecordFactory {
    signer: Arc<dyn Signer>,
    signer_timeout: Duration,
}

impl RecordFactory {
    pub fn new(signer: Arc<dyn Signer>, signer_timeout: Duration) -> Self {
        Self {
            signer,
            signer_timeout,
        }
    }

    /// Validate, canonicalize and sign. Touches no chain state.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, invoice_number = %data.invoice_number))]
    pub async fn build(
        &self,
        tenant_id: TenantId,
        data: &InvoiceData,
    ) -> Result<RecordDraft, BuildError> {
        let payload = data.canonical_payload()?;

        let signing = tokio::time::timeout(self.signer_timeout, self.signer.sign(&payload)).await;
        let signature_ref = match signing {
            Ok(Ok(signature_ref)) => signature_ref,
            Ok(Err(err)) => {
                warn!(error = %err, "signing failed");
                return Err(err.into());
            }
            Err(_) => {
                warn!(timeout = ?self.signer_timeout, "signer timed out");
                return Err(SigningError::Timeout(self.signer_timeout).into());
            }
        };

        Ok(RecordDraft {
            payload,
            signature_ref,
        })
    }
}

/// Build then append. The ledger is never touched when the build fails.
pub struct FiscalPipeline<S> {
    factory: RecordFactory,
    ledger: Arc<ChainLedger<S>>,
}

impl<S: ChainStore> FiscalPipeline<S> {
    pub fn new(factory: RecordFactory, ledger: Arc<ChainLedger<S>>) -> Self {
        Self { factory, ledger }
    }

    pub async fn issue(
        &self,
        tenant_id: TenantId,
        data: &InvoiceData,
    ) -> Result<InvoiceRecord, PipelineError> {
        let draft = self.factory.build(tenant_id, data).await?;
        let record = self.ledger.append_record(tenant_id, draft)?;
        info!(
            tenant_id = %tenant_id,
            sequence_no = record.sequence_no(),
            "invoice issued"
        );
        Ok(record)
    }
}
