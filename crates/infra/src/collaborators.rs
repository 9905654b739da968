//! External collaborators: signer, transport and alert sink.
//!
//! Signature computation, the wire client and alert delivery live outside
//! this workspace. The pipeline only sees these traits; every call into them
//! is bounded by a timeout at the call site.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use fiscalchain_core::{BatchId, TenantId};
use fiscalchain_ledger::{CanonicalPayload, InvoiceRecord, SignatureRef};
use fiscalchain_remision::AeatResponse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("signer failed: {0}")]
    Failed(String),

    #[error("signer timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to obtain a response for a batch. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// The response did not line up with the submitted batch.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the failure says something about the endpoint rather than
    /// about the one batch that was sent.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(self, TransportError::Transient(_) | TransportError::Timeout(_))
    }
}

/// Opaque metadata forwarded with every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub tenant_id: TenantId,
    pub software_id: String,
    pub software_version: String,
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, payload: &CanonicalPayload) -> Result<SignatureRef, SigningError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit `records` under the idempotency key `batch_id`.
    ///
    /// Resubmitting the same `batch_id` must not create duplicates upstream.
    async fn submit(
        &self,
        batch_id: BatchId,
        metadata: &SubmissionMetadata,
        records: &[InvoiceRecord],
    ) -> Result<Vec<AeatResponse>, TransportError>;
}

/// Why operators are being paged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AlertReason {
    BatchDead {
        batch_id: BatchId,
        attempts: u32,
        last_error: Option<String>,
    },
    IntegrityBroken {
        broken_at_sequence_no: u64,
        detail: String,
    },
}

impl core::fmt::Display for AlertReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AlertReason::BatchDead {
                batch_id,
                attempts,
                last_error,
            } => write!(
                f,
                "batch {batch_id} dead after {attempts} attempts ({})",
                last_error.as_deref().unwrap_or("no error recorded")
            ),
            AlertReason::IntegrityBroken {
                broken_at_sequence_no,
                detail,
            } => write!(f, "chain broken at sequence {broken_at_sequence_no}: {detail}"),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, tenant_id: TenantId, reason: AlertReason);
}

/// Alert sink that only emits an error-level log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, tenant_id: TenantId, reason: AlertReason) {
        error!(tenant_id = %tenant_id, reason = %reason, "fiscal chain alert");
    }
}
