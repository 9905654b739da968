//! Infrastructure layer: chain store, external collaborators, the submission
//! pipeline and its background worker.

pub mod assembler;
pub mod collaborators;
pub mod config;
pub mod factory;
pub mod ledger;
pub mod orchestrator;
pub mod sif_log;
pub mod store;
pub mod verifier;
pub mod workers;

pub use assembler::{Assembly, BatchAssembler, NoneReadyReason};
pub use collaborators::{
    AlertReason, AlertSink, Signer, SigningError, SubmissionMetadata, TracingAlertSink, Transport,
    TransportError,
};
pub use config::ChainConfig;
pub use factory::{BuildError, FiscalPipeline, PipelineError, RecordFactory};
pub use ledger::{ChainLedger, LedgerError, RecordDraft};
pub use orchestrator::{
    ExhaustedRetriesError, SubmissionError, SubmissionOrchestrator, SubmissionOutcome,
};
pub use sif_log::{InMemorySifEventLog, SifEvent, SifEventKind, SifEventLog, SifLogError};
pub use store::{ChainStore, InMemoryChainStore, RemisionStats, StoreError};
pub use verifier::{ChainIntegrityError, IntegrityVerifier, VerifyError};
pub use workers::{SubmissionWorker, SubmissionWorkerHandle, TickReport};

#[cfg(test)]
mod test_support;
