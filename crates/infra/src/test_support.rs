//! Scripted collaborators and a wired-up pipeline for tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};

use fiscalchain_core::{BatchId, TenantId};
use fiscalchain_ledger::{CanonicalPayload, InvoiceData, InvoiceRecord, RecordKind, SignatureRef};
use fiscalchain_remision::AeatResponse;

use crate::assembler::BatchAssembler;
use crate::collaborators::{
    AlertReason, AlertSink, Signer, SigningError, SubmissionMetadata, Transport, TransportError,
};
use crate::config::ChainConfig;
use crate::factory::{FiscalPipeline, RecordFactory};
use crate::ledger::ChainLedger;
use crate::orchestrator::SubmissionOrchestrator;
use crate::sif_log::InMemorySifEventLog;
use crate::store::InMemoryChainStore;
use crate::verifier::IntegrityVerifier;
use crate::workers::SubmissionWorker;

pub(crate) type TestStore = Arc<InMemoryChainStore>;

pub(crate) struct StaticSigner;

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, payload: &CanonicalPayload) -> Result<SignatureRef, SigningError> {
        Ok(SignatureRef::new(format!("SIG-{}", payload.invoice_number())))
    }
}

pub(crate) struct FailingSigner;

#[async_trait]
impl Signer for FailingSigner {
    async fn sign(&self, _payload: &CanonicalPayload) -> Result<SignatureRef, SigningError> {
        Err(SigningError::Failed("certificate expired".to_string()))
    }
}

pub(crate) struct HangingSigner;

#[async_trait]
impl Signer for HangingSigner {
    async fn sign(&self, _payload: &CanonicalPayload) -> Result<SignatureRef, SigningError> {
        std::future::pending().await
    }
}

/// One scripted transport reply.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    AcceptAll,
    /// Reject these sequence numbers, accept the rest.
    Reject(Vec<u64>),
    /// Answer verbatim, whatever the batch contains.
    Raw(Vec<AeatResponse>),
    Fail(String),
    Hang,
    /// Wait, then answer with the inner reply.
    After(Duration, Box<Reply>),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub batch_id: BatchId,
    pub sequence_nos: Vec<u64>,
    pub metadata: SubmissionMetadata,
}

/// Transport that plays back `Reply`s in order, then accepts everything.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    stalled: Mutex<HashSet<TenantId>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            stalled: Mutex::new(HashSet::new()),
        })
    }

    /// Never answer submissions of `tenant_id`.
    pub(crate) fn stall_tenant(&self, tenant_id: TenantId) {
        self.stalled.lock().unwrap().insert(tenant_id);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(
        &self,
        batch_id: BatchId,
        metadata: &SubmissionMetadata,
        records: &[InvoiceRecord],
    ) -> Result<Vec<AeatResponse>, TransportError> {
        let sequence_nos: Vec<u64> = records.iter().map(|r| r.sequence_no()).collect();
        self.calls.lock().unwrap().push(Call {
            batch_id,
            sequence_nos: sequence_nos.clone(),
            metadata: metadata.clone(),
        });
        if self.stalled.lock().unwrap().contains(&metadata.tenant_id) {
            return std::future::pending().await;
        }
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::AcceptAll);
        let reply = match reply {
            Reply::After(delay, inner) => {
                tokio::time::sleep(delay).await;
                *inner
            }
            other => other,
        };

        match reply {
            Reply::AcceptAll => Ok(sequence_nos.into_iter().map(AeatResponse::accepted).collect()),
            Reply::Reject(rejected) => Ok(sequence_nos
                .into_iter()
                .map(|seq| {
                    if rejected.contains(&seq) {
                        AeatResponse::rejected(seq, "1100", "Valor o tipo incorrecto")
                    } else {
                        AeatResponse::accepted(seq)
                    }
                })
                .collect()),
            Reply::Raw(responses) => Ok(responses),
            Reply::Fail(reason) => Err(TransportError::Transient(reason)),
            Reply::Hang => std::future::pending().await,
            Reply::After(..) => Err(TransportError::Protocol("nested delay".to_string())),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingAlertSink {
    alerts: Mutex<Vec<(TenantId, AlertReason)>>,
}

impl RecordingAlertSink {
    pub(crate) fn alerts(&self) -> Vec<(TenantId, AlertReason)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, tenant_id: TenantId, reason: AlertReason) {
        self.alerts.lock().unwrap().push((tenant_id, reason));
    }
}

pub(crate) fn invoice(n: u32) -> InvoiceData {
    InvoiceData {
        kind: RecordKind::Alta,
        issuer_tax_id: "B12345678".to_string(),
        issuer_name: "Jaraba Impact SL".to_string(),
        invoice_number: format!("VF-2025-{n:06}"),
        issue_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        invoice_type: "F1".to_string(),
        regime_key: "01".to_string(),
        tax_base: 10_000 + i64::from(n),
        tax_amount: 2_100,
        total_amount: 12_100 + i64::from(n),
        generated_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
    }
}

/// Defaults with one-second collaborator timeouts.
pub(crate) fn test_config() -> ChainConfig {
    ChainConfig {
        signer_timeout_seconds: 1,
        transport_timeout_seconds: 1,
        ..ChainConfig::default()
    }
}

/// Every component wired over one in-memory store.
pub(crate) struct Harness {
    pub config: ChainConfig,
    pub store: TestStore,
    pub sif_log: Arc<InMemorySifEventLog>,
    pub alerts: Arc<RecordingAlertSink>,
    pub transport: Arc<ScriptedTransport>,
    pub ledger: Arc<ChainLedger<TestStore>>,
    pub pipeline: FiscalPipeline<TestStore>,
    pub assembler: Arc<BatchAssembler<TestStore>>,
    pub orchestrator: Arc<SubmissionOrchestrator<TestStore>>,
    pub verifier: IntegrityVerifier<TestStore>,
}

impl Harness {
    pub(crate) fn new(config: ChainConfig, replies: impl IntoIterator<Item = Reply>) -> Self {
        Self::with_signer(config, replies, Arc::new(StaticSigner))
    }

    pub(crate) fn with_signer(
        config: ChainConfig,
        replies: impl IntoIterator<Item = Reply>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let store: TestStore = Arc::new(InMemoryChainStore::new());
        let sif_log = InMemorySifEventLog::arc();
        let alerts = Arc::new(RecordingAlertSink::default());
        let transport = ScriptedTransport::new(replies);

        let ledger = Arc::new(ChainLedger::new(store.clone(), sif_log.clone()));
        let pipeline = FiscalPipeline::new(
            RecordFactory::new(signer, config.signer_timeout()),
            ledger.clone(),
        );
        let assembler = Arc::new(BatchAssembler::new(
            store.clone(),
            sif_log.clone(),
            config.flow_control(),
            config.max_records_per_batch,
        ));
        let orchestrator = Arc::new(SubmissionOrchestrator::new(
            store.clone(),
            transport.clone(),
            alerts.clone(),
            sif_log.clone(),
            &config,
        ));
        let verifier = IntegrityVerifier::new(store.clone(), alerts.clone(), sif_log.clone());

        Self {
            config,
            store,
            sif_log,
            alerts,
            transport,
            ledger,
            pipeline,
            assembler,
            orchestrator,
            verifier,
        }
    }

    /// Another orchestrator over the same store and transport, as a second
    /// process would run it.
    pub(crate) fn peer_orchestrator(&self) -> SubmissionOrchestrator<TestStore> {
        SubmissionOrchestrator::new(
            self.store.clone(),
            self.transport.clone(),
            self.alerts.clone(),
            self.sif_log.clone(),
            &self.config,
        )
    }

    pub(crate) fn worker(&self) -> SubmissionWorker<TestStore> {
        SubmissionWorker::new(
            self.store.clone(),
            self.assembler.clone(),
            self.orchestrator.clone(),
        )
    }

    pub(crate) async fn issue(&self, tenant_id: TenantId, count: u32) -> Vec<InvoiceRecord> {
        let mut records = Vec::with_capacity(count as usize);
        for n in 1..=count {
            records.push(self.pipeline.issue(tenant_id, &invoice(n)).await.unwrap());
        }
        records
    }
}
