//! Pipeline orchestration: the per-document state machine, the ingress
//! trigger that starts executions, and the control surface read/provision
//! procedures.

mod control;
mod ingress;
mod orchestrator;

pub use control::{
    ControlSurface, InsightsResponse, ProvisionedUpload, RedactedAccess, SweepReport,
    MAX_UPLOAD_BYTES,
};
pub use ingress::{BlobEvent, IngressOutcome, IngressTrigger};
pub use orchestrator::{Orchestrator, PipelineContext};

use thiserror::Error;

use crate::models::StepName;
use crate::repository::RepositoryError;
use crate::storage::BlobError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Record store error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),
    #[error("stage {step:?} failed: {message}")]
    StageFailed { step: StepName, message: String },
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
