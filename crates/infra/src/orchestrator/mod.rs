//! Submission orchestrator: drives one batch through an authority exchange.
//!
//! ```text
//! pending -> sending -> accepted | partial | rejected   (response received)
//!              |  ^
//!              |  +-- transport failure, attempts left   (retry at backoff)
//!              +----> dead                               (attempts exhausted)
//! ```
//!
//! Every attempt reuses the batch id as idempotency key. A transport call is
//! bounded by its own timeout; a timeout counts as a transport failure. While
//! the circuit breaker is open submissions are deferred and no attempt is
//! consumed.
//!
//! One attempt per batch at a time: an in-process claim rejects overlapping
//! `submit` calls, and every batch write is checked against the revision the
//! attempt started from, so a second process can never reopen a final batch.

pub mod breaker;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use fiscalchain_core::{BatchId, DomainError, TenantId};
use fiscalchain_remision::{
    BatchStatus, ClassifiedResponse, FailureDisposition, RemisionBatch, RetryPolicy,
    classify_responses,
};

use crate::collaborators::{AlertReason, AlertSink, SubmissionMetadata, Transport, TransportError};
use crate::config::ChainConfig;
use crate::sif_log::{SifEventKind, SifEventLog, record_event};
use crate::store::{ChainStore, RemisionStats, StoreError};

pub use breaker::CircuitBreaker;

/// A batch ran out of attempts and is now `dead`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("batch {batch_id} of tenant {tenant_id} dead after {attempts} attempts: {last_error}")]
pub struct ExhaustedRetriesError {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    ExhaustedRetries(#[from] ExhaustedRetriesError),
}

/// Result of one `submit` call that did not end in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The authority answered; `status` is accepted, partial or rejected.
    Completed {
        status: BatchStatus,
        accepted: usize,
        rejected: usize,
    },
    RetryScheduled {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
        error: TransportError,
    },
    /// Circuit breaker open; nothing was sent.
    Deferred { until: DateTime<Utc> },
    /// Waiting for its backoff to expire.
    NotDue { next_retry_at: Option<DateTime<Utc>> },
    /// Another attempt for this batch is running; nothing was sent.
    InFlight,
    AlreadyFinal(BatchStatus),
}

/// Marks a batch as in flight until dropped.
struct InFlightClaim<'a> {
    in_flight: &'a Mutex<HashSet<BatchId>>,
    batch_id: BatchId,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.batch_id);
    }
}

pub struct SubmissionOrchestrator<S> {
    store: S,
    transport: Arc<dyn Transport>,
    alerts: Arc<dyn AlertSink>,
    sif_log: Arc<dyn SifEventLog>,
    policy: RetryPolicy,
    transport_timeout: Duration,
    software_id: String,
    software_version: String,
    breaker: Mutex<CircuitBreaker>,
    in_flight: Mutex<HashSet<BatchId>>,
}

impl<S: ChainStore> SubmissionOrchestrator<S> {
    pub fn new(
        store: S,
        transport: Arc<dyn Transport>,
        alerts: Arc<dyn AlertSink>,
        sif_log: Arc<dyn SifEventLog>,
        config: &ChainConfig,
    ) -> Self {
        Self {
            store,
            transport,
            alerts,
            sif_log,
            policy: config.retry_policy(),
            transport_timeout: config.transport_timeout(),
            software_id: config.software_id.clone(),
            software_version: config.software_version.clone(),
            breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_pause(),
            )),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, batch_id: BatchId) -> Option<InFlightClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(batch_id) {
            return None;
        }
        Some(InFlightClaim {
            in_flight: &self.in_flight,
            batch_id,
        })
    }

    /// Perform one submission attempt for `batch_id` if it is due at `now`.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, batch_id = %batch_id))]
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let Some(_claim) = self.claim(batch_id) else {
            debug!("batch already in flight");
            return Ok(SubmissionOutcome::InFlight);
        };

        let mut batch = self
            .store
            .get_batch(tenant_id, batch_id)?
            .ok_or(SubmissionError::BatchNotFound(batch_id))?;

        if batch.status().is_terminal() {
            debug!(status = batch.status().as_str(), "batch already final");
            return Ok(SubmissionOutcome::AlreadyFinal(batch.status()));
        }
        if !batch.is_due(now) {
            return Ok(SubmissionOutcome::NotDue {
                next_retry_at: batch.next_retry_at(),
            });
        }

        let open_until = self.breaker().open_until(now);
        if let Some(until) = open_until {
            debug!(until = %until, "circuit breaker open, submission deferred");
            return Ok(SubmissionOutcome::Deferred { until });
        }

        let loaded = batch.revision();
        batch.mark_sending(now)?;
        match self.store.update_batch(&batch, loaded) {
            Ok(()) => {}
            Err(StoreError::Concurrency(reason)) => {
                debug!(%reason, "batch claimed elsewhere");
                return Ok(SubmissionOutcome::InFlight);
            }
            Err(err) => return Err(err.into()),
        }
        let claimed = batch.revision();
        let records = self.store.records(tenant_id, batch.record_sequence_nos())?;

        let attempt = batch.attempt_count() + 1;
        info!(attempt, records = records.len(), "submitting batch");
        record_event(
            self.sif_log.as_ref(),
            tenant_id,
            SifEventKind::AeatSubmit,
            now,
            json!({
                "batch_id": batch_id,
                "attempt": attempt,
                "records": records.len(),
                "software_id": self.software_id,
                "software_version": self.software_version,
            }),
        );

        let metadata = SubmissionMetadata {
            tenant_id,
            software_id: self.software_id.clone(),
            software_version: self.software_version.clone(),
        };
        let exchange = tokio::time::timeout(
            self.transport_timeout,
            self.transport.submit(batch_id, &metadata, &records),
        )
        .await;

        let failure = match exchange {
            Ok(Ok(responses)) => match classify_responses(batch.record_sequence_nos(), &responses) {
                Ok(classified) => return self.complete(batch, claimed, classified, now),
                Err(mismatch) => TransportError::Protocol(mismatch.to_string()),
            },
            Ok(Err(err)) => err,
            Err(_) => TransportError::Timeout(self.transport_timeout),
        };

        self.fail(batch, claimed, failure, now).await
    }

    fn complete(
        &self,
        mut batch: RemisionBatch,
        claimed: u64,
        classified: ClassifiedResponse,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        self.breaker().record_success();

        batch.record_response(&classified, now)?;
        self.store.commit_outcome(&batch, &classified, claimed)?;

        let accepted: Vec<u64> = classified
            .accepted
            .iter()
            .map(|r| r.record_sequence_no)
            .collect();
        let rejected: Vec<_> = classified
            .rejected
            .iter()
            .map(|r| {
                json!({
                    "sequence_no": r.record_sequence_no,
                    "error_code": r.error_code,
                    "error_message": r.error_message,
                })
            })
            .collect();
        record_event(
            self.sif_log.as_ref(),
            batch.tenant_id(),
            SifEventKind::AeatResponse,
            now,
            json!({
                "batch_id": batch.batch_id(),
                "status": batch.status().as_str(),
                "accepted": accepted,
                "rejected": rejected,
            }),
        );

        info!(
            status = batch.status().as_str(),
            accepted = batch.accepted_count(),
            rejected = batch.rejected_count(),
            "batch answered"
        );

        Ok(SubmissionOutcome::Completed {
            status: batch.status(),
            accepted: batch.accepted_count(),
            rejected: batch.rejected_count(),
        })
    }

    async fn fail(
        &self,
        mut batch: RemisionBatch,
        claimed: u64,
        failure: TransportError,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        // A malformed answer is specific to this batch and says nothing about the endpoint.
        if failure.is_endpoint_failure() {
            let opened = self.breaker().record_failure(now);
            if opened {
                warn!(error = %failure, "circuit breaker opened");
            }
        }

        match batch.record_transport_failure(failure.to_string(), &self.policy, now)? {
            FailureDisposition::RetryAt(next_retry_at) => {
                self.store.update_batch(&batch, claimed)?;
                warn!(
                    attempt = batch.attempt_count(),
                    next_retry_at = %next_retry_at,
                    error = %failure,
                    "submission failed, retry scheduled"
                );
                Ok(SubmissionOutcome::RetryScheduled {
                    attempt: batch.attempt_count(),
                    next_retry_at,
                    error: failure,
                })
            }
            FailureDisposition::Dead => {
                self.store.release_batch(&batch, claimed)?;

                let tenant_id = batch.tenant_id();
                let exhausted = ExhaustedRetriesError {
                    tenant_id,
                    batch_id: batch.batch_id(),
                    attempts: batch.attempt_count(),
                    last_error: failure.to_string(),
                };
                error!(
                    attempts = exhausted.attempts,
                    error = %failure,
                    "batch dead, records released"
                );
                record_event(
                    self.sif_log.as_ref(),
                    tenant_id,
                    SifEventKind::BatchDead,
                    now,
                    json!({
                        "batch_id": batch.batch_id(),
                        "attempts": exhausted.attempts,
                        "last_error": exhausted.last_error,
                        "released": batch.record_sequence_nos(),
                    }),
                );
                self.alerts
                    .notify(
                        tenant_id,
                        AlertReason::BatchDead {
                            batch_id: batch.batch_id(),
                            attempts: exhausted.attempts,
                            last_error: batch.last_error().map(str::to_string),
                        },
                    )
                    .await;

                Err(exhausted.into())
            }
        }
    }

    pub fn stats(&self, tenant_id: TenantId) -> Result<RemisionStats, SubmissionError> {
        Ok(self.store.stats(tenant_id)?)
    }
}
