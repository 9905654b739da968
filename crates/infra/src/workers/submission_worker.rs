use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fiscalchain_core::TenantId;

use crate::assembler::{Assembly, BatchAssembler};
use crate::orchestrator::{SubmissionError, SubmissionOrchestrator, SubmissionOutcome};
use crate::store::ChainStore;

/// Handle to stop and join a running submission worker.
#[derive(Debug)]
pub struct SubmissionWorkerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SubmissionWorkerHandle {
    /// Request graceful shutdown and wait for the current tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.join.await {
            error!(error = %err, "submission worker task failed");
        }
    }
}

/// What one pass over all tenants did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub batches_created: usize,
    pub submissions: usize,
    pub completed: usize,
    pub retries_scheduled: usize,
    pub deferred: usize,
    pub dead: usize,
    pub errors: usize,
}

impl TickReport {
    fn absorb(&mut self, other: TickReport) {
        self.batches_created += other.batches_created;
        self.submissions += other.submissions;
        self.completed += other.completed;
        self.retries_scheduled += other.retries_scheduled;
        self.deferred += other.deferred;
        self.dead += other.dead;
        self.errors += other.errors;
    }
}

/// Background loop: assemble batches, then submit each tenant's batches in
/// creation order.
///
/// Tenants run as separate tasks, so one slow endpoint exchange does not hold
/// back the others. Per tenant only the oldest non-terminal batch may be in
/// flight. A newer batch waits while an older one is still backing off, so the
/// authority always receives a tenant's records in chain order.
pub struct SubmissionWorker<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    store: S,
    assembler: Arc<BatchAssembler<S>>,
    orchestrator: Arc<SubmissionOrchestrator<S>>,
}

impl<S: ChainStore + 'static> SubmissionWorker<S> {
    pub fn new(
        store: S,
        assembler: Arc<BatchAssembler<S>>,
        orchestrator: Arc<SubmissionOrchestrator<S>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                assembler,
                orchestrator,
            }),
        }
    }

    /// Run one pass at `now`, all tenants concurrently.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let tenants = match self.shared.store.tenants() {
            Ok(tenants) => tenants,
            Err(err) => {
                error!(error = %err, "failed to list tenants");
                report.errors += 1;
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for tenant_id in tenants {
            let shared = Arc::clone(&self.shared);
            tasks.spawn(async move { shared.tick_tenant(tenant_id, now).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partial) => report.absorb(partial),
                Err(err) => {
                    error!(error = %err, "tenant submission task failed");
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(self, poll_interval: Duration) -> SubmissionWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!(poll_ms = poll_interval.as_millis() as u64, "submission worker started");
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let report = self.tick(Utc::now()).await;
                        if report != TickReport::default() {
                            debug!(?report, "submission worker tick");
                        }
                    }
                }
            }

            info!("submission worker stopped");
        });

        SubmissionWorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

impl<S: ChainStore + 'static> Shared<S> {
    async fn tick_tenant(&self, tenant_id: TenantId, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        match self.assembler.assemble(tenant_id, now) {
            Ok(Assembly::Ready(_)) => report.batches_created += 1,
            Ok(Assembly::NoneReady(reason)) => {
                debug!(tenant_id = %tenant_id, reason = ?reason, "no batch assembled");
            }
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "batch assembly failed");
                report.errors += 1;
            }
        }

        let batches = match self.store.batches(tenant_id) {
            Ok(batches) => batches,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "failed to load batches");
                report.errors += 1;
                return report;
            }
        };

        // Head-of-line: move to the next batch only once the current one is final.
        for batch in batches.iter().filter(|b| !b.status().is_terminal()) {
            if !batch.is_due(now) {
                break;
            }
            report.submissions += 1;
            match self.orchestrator.submit(tenant_id, batch.batch_id(), now).await {
                Ok(SubmissionOutcome::Completed { .. }) => report.completed += 1,
                Ok(SubmissionOutcome::AlreadyFinal(_)) => {}
                Ok(SubmissionOutcome::RetryScheduled { .. }) => {
                    report.retries_scheduled += 1;
                    break;
                }
                Ok(SubmissionOutcome::Deferred { .. }) => {
                    report.deferred += 1;
                    break;
                }
                Ok(SubmissionOutcome::NotDue { .. } | SubmissionOutcome::InFlight) => break,
                Err(SubmissionError::ExhaustedRetries(_)) => report.dead += 1,
                Err(err) => {
                    error!(
                        tenant_id = %tenant_id,
                        batch_id = %batch.batch_id(),
                        error = %err,
                        "submission failed"
                    );
                    report.errors += 1;
                    break;
                }
            }
        }
        report
    }
}
