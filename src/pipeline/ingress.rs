//! Ingress trigger: blob-create events start executions.
//!
//! Only objects under the `uploads/` prefix are considered. Document
//! identity comes from the canonical key layout, and execution names are
//! deterministic per document so a duplicate event reports
//! `already_exists` instead of racing a second execution.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::Result;
use crate::models::{StepName, StepState};
use crate::repository::{RecordStore, RepositoryError, StepUpdate};
use crate::storage::parse_upload_key;

/// A blob-create notification.
#[derive(Debug, Clone)]
pub struct BlobEvent {
    pub bucket: String,
    pub key: String,
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// An execution should run; carries the execution handle.
    Started {
        document_id: String,
        execution_handle: String,
    },
    /// An execution with this name already exists for the document.
    AlreadyExists { document_id: String },
    /// Event did not correspond to a processable upload.
    Skipped { reason: String },
}

/// Consumes blob-create events and claims executions.
pub struct IngressTrigger {
    records: Arc<RecordStore>,
}

impl IngressTrigger {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Handle one event. Claiming is a CAS write of the execution handle
    /// on the record, so exactly one caller per document gets `Started`.
    pub fn handle_event(&self, event: &BlobEvent) -> Result<IngressOutcome> {
        if !event.key.starts_with("uploads/") {
            return Ok(IngressOutcome::Skipped {
                reason: format!("ignoring non-upload prefix: {}", event.key),
            });
        }

        let parsed = match parse_upload_key(&event.key) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key = %event.key, error = %e, "invalid upload key, skipping");
                return Ok(IngressOutcome::Skipped {
                    reason: format!("invalid upload key: {}", event.key),
                });
            }
        };

        let document_id = parsed.document_id;
        if self.records.get(&document_id)?.is_none() {
            warn!(document_id, key = %event.key, "no provisioned record for upload, skipping");
            return Ok(IngressOutcome::Skipped {
                reason: format!("no record for document {document_id}"),
            });
        }

        let execution_handle = execution_name(&document_id);
        let claim = self.records.update(&document_id, |rec| {
            if rec.execution_handle.is_some() {
                return Err(RepositoryError::AlreadyExists(document_id.clone()));
            }
            rec.execution_handle = Some(execution_handle.clone());
            rec.processing_started_at = Some(Utc::now());
            Ok(())
        });

        match claim {
            Ok(_) => {
                // The arrival of the original is what completes the upload
                // step.
                let upload_state = self
                    .records
                    .get_required(&document_id)?
                    .step(StepName::Upload)
                    .state;
                if upload_state == StepState::Pending {
                    self.records.update_step(
                        &document_id,
                        StepName::Upload,
                        StepState::InProgress,
                        StepUpdate::default(),
                    )?;
                }
                info!(document_id, execution_handle = %execution_handle, "execution claimed");
                Ok(IngressOutcome::Started {
                    document_id,
                    execution_handle,
                })
            }
            Err(RepositoryError::AlreadyExists(_)) => {
                info!(document_id, "duplicate event, execution already exists");
                Ok(IngressOutcome::AlreadyExists { document_id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Deterministic execution name for a document.
pub fn execution_name(document_id: &str) -> String {
    format!("dd214-{document_id}")
}
