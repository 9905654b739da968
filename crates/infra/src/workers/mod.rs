//! Background workers.

pub mod submission_worker;

pub use submission_worker::{SubmissionWorker, SubmissionWorkerHandle, TickReport};
