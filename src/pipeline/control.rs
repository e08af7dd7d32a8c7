//! Control surface procedures consumed by external HTTP handlers.
//!
//! These are plain library procedures returning typed values; transports
//! wrap them. Provisioning assigns document identity, the getters serve
//! the poll loop, and the sweep enforces retention.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::{PipelineError, Result};
use crate::config::Config;
use crate::models::{
    DocumentRecord, DocumentStatus, SourceRef, StepName, StepState, VeteranProfile,
};
use crate::repository::{InsightsStore, RecordStore};
use crate::storage::{
    self, extension_to_mime, filename_extension, BlobStore, PresignedUrl, ALLOWED_EXTENSIONS,
};

/// Upload size ceiling (10 MB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// PUT URL lifetime handed to uploaders.
const UPLOAD_URL_TTL_SECS: u64 = 300;
/// GET URL lifetime for redacted artifacts.
const READ_URL_TTL_SECS: u64 = 3600;

/// Result of provisioning an upload.
#[derive(Debug, Clone)]
pub struct ProvisionedUpload {
    pub document_id: String,
    pub key: String,
    pub upload_url: PresignedUrl,
    pub expires_in_secs: u64,
}

/// Redacted-artifact access for consumers.
#[derive(Debug, Clone)]
pub enum RedactedAccess {
    Ready {
        url: PresignedUrl,
        redacted_at: Option<DateTime<Utc>>,
        items_redacted: usize,
    },
    NotReady,
}

/// Insight retrieval states mirroring the processing record.
#[derive(Debug, Clone)]
pub enum InsightsResponse {
    Available {
        profile: VeteranProfile,
        insights: Value,
        generated_at: DateTime<Utc>,
    },
    Generating,
    Processing { current_step: Option<StepName> },
    Failed { message: String },
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub records_deleted: usize,
    pub blobs_deleted: usize,
}

/// The internal procedures behind the HTTP read side.
pub struct ControlSurface {
    config: Config,
    records: Arc<RecordStore>,
    insights: Arc<InsightsStore>,
    blob: Arc<dyn BlobStore>,
}

impl ControlSurface {
    pub fn new(
        config: Config,
        records: Arc<RecordStore>,
        insights: Arc<InsightsStore>,
        blob: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            records,
            insights,
            blob,
        }
    }

    /// Assign a document id and hand back a bounded-lifetime upload URL.
    ///
    /// The record is created in `pending_upload` with every step pending;
    /// the blob-create event for the returned key starts processing.
    pub fn provision_upload(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: &str,
    ) -> Result<ProvisionedUpload> {
        if owner_id.is_empty() || owner_id.contains('/') {
            return Err(PipelineError::Invalid("invalid owner id".to_string()));
        }
        let extension = filename_extension(filename).ok_or_else(|| {
            PipelineError::Invalid(format!("filename has no extension: {filename}"))
        })?;
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(PipelineError::Invalid(format!(
                "invalid file type .{extension}; allowed: {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let key = storage::upload_key(owner_id, &document_id, &extension, Utc::now());
        let record = DocumentRecord::new(
            document_id.clone(),
            owner_id.to_string(),
            SourceRef {
                bucket: self.config.blob.originals_bucket.clone(),
                key: key.clone(),
                content_type: if content_type.is_empty() {
                    extension_to_mime(&extension).to_string()
                } else {
                    content_type.to_string()
                },
                byte_size: 0,
                original_filename: filename.to_string(),
            },
            self.config.retention.ttl_days,
        );
        self.records.create(&record)?;

        let upload_url =
            self.blob
                .presign_put(&self.config.blob.originals_bucket, &key, UPLOAD_URL_TTL_SECS);
        info!(document_id, key, "upload provisioned");
        Ok(ProvisionedUpload {
            document_id,
            key,
            upload_url,
            expires_in_secs: UPLOAD_URL_TTL_SECS,
        })
    }

    pub fn get_record(&self, document_id: &str) -> Result<DocumentRecord> {
        self.records
            .get(document_id)?
            .ok_or_else(|| PipelineError::NotFound(document_id.to_string()))
    }

    /// Signed URL for the redacted artifact, once it exists.
    pub fn get_redacted(&self, document_id: &str) -> Result<RedactedAccess> {
        let record = self.get_record(document_id)?;
        let Some(redacted_ref) = &record.redacted_ref else {
            return Ok(RedactedAccess::NotReady);
        };
        let step = record.step(StepName::Redaction);
        let items_redacted = if record.redaction_degraded {
            0
        } else {
            record.pii_findings.len()
        };
        Ok(RedactedAccess::Ready {
            url: self
                .blob
                .presign_get(&redacted_ref.bucket, &redacted_ref.key, READ_URL_TTL_SECS),
            redacted_at: step.completed_at,
            items_redacted,
        })
    }

    /// The insight artifact, or the stage of processing blocking it.
    pub fn get_insights(&self, document_id: &str) -> Result<InsightsResponse> {
        if let Some(row) = self.insights.get(document_id)? {
            return Ok(InsightsResponse::Available {
                profile: row.veteran_profile,
                insights: row.ai_insights,
                generated_at: row.created_at,
            });
        }

        let record = self.get_record(document_id)?;
        let insights_step = record.step(StepName::Insights);
        match insights_step.state {
            StepState::Error => Ok(InsightsResponse::Failed {
                message: insights_step
                    .error_message
                    .unwrap_or_else(|| "insights generation failed".to_string()),
            }),
            StepState::InProgress => Ok(InsightsResponse::Generating),
            _ => {
                if record.status == DocumentStatus::Error {
                    let failing = StepName::ALL
                        .iter()
                        .find(|n| record.step(**n).state == StepState::Error);
                    let message = failing
                        .map(|n| {
                            let step = record.step(*n);
                            format!(
                                "{} failed: {}",
                                n.as_str(),
                                step.error_message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| "processing failed".to_string());
                    return Ok(InsightsResponse::Failed { message });
                }
                let current_step = StepName::ALL
                    .iter()
                    .find(|n| record.step(**n).state == StepState::InProgress)
                    .or_else(|| {
                        StepName::ALL
                            .iter()
                            .find(|n| record.step(**n).state == StepState::Pending)
                    })
                    .copied();
                Ok(InsightsResponse::Processing { current_step })
            }
        }
    }

    /// Delete everything whose retention deadline has passed.
    pub async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for record in self.records.scan_expired(cutoff)? {
            let document_id = &record.document_id;
            let originals = &self.config.blob.originals_bucket;
            let redacted = &self.config.blob.redacted_bucket;

            let keys = [
                (originals.clone(), record.source_ref.key.clone()),
                (originals.clone(), storage::full_results_key(document_id)),
                (originals.clone(), storage::full_text_key(document_id)),
                (
                    originals.clone(),
                    storage::extraction_summary_key(document_id),
                ),
                (redacted.clone(), storage::redacted_key(document_id)),
            ];
            for (bucket, key) in keys {
                match self.blob.delete(&bucket, &key).await {
                    Ok(()) => report.blobs_deleted += 1,
                    Err(e) => warn!(document_id, key, error = %e, "sweep blob delete failed"),
                }
            }

            self.insights.delete(document_id)?;
            self.records.delete(document_id)?;
            report.records_deleted += 1;
            info!(document_id, "expired record swept");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsBlobStore;
    use tempfile::tempdir;

    fn surface() -> (tempfile::TempDir, ControlSurface, Arc<RecordStore>) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let records = Arc::new(RecordStore::new(dir.path().join("records.db")).unwrap());
        let insights = Arc::new(InsightsStore::new(dir.path().join("insights.db")).unwrap());
        let blob = Arc::new(FsBlobStore::new(dir.path().join("blobs")).unwrap());
        let surface = ControlSurface::new(config, records.clone(), insights, blob);
        (dir, surface, records)
    }

    #[test]
    fn test_provision_creates_pending_record() {
        let (_dir, surface, records) = surface();
        let provisioned = surface
            .provision_upload("owner-1", "my dd214.pdf", "application/pdf")
            .unwrap();

        assert!(provisioned.key.starts_with("uploads/owner-1/"));
        assert!(provisioned.key.ends_with(&format!("{}.pdf", provisioned.document_id)));
        assert_eq!(provisioned.expires_in_secs, 300);

        let record = records.get(&provisioned.document_id).unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::PendingUpload);
        assert_eq!(record.source_ref.original_filename, "my dd214.pdf");
        assert!(record
            .steps
            .values()
            .all(|s| s.state == StepState::Pending));
    }

    #[test]
    fn test_provision_rejects_bad_extension() {
        let (_dir, surface, _records) = surface();
        assert!(matches!(
            surface.provision_upload("owner-1", "malware.exe", "application/octet-stream"),
            Err(PipelineError::Invalid(_))
        ));
        assert!(matches!(
            surface.provision_upload("owner-1", "noextension", ""),
            Err(PipelineError::Invalid(_))
        ));
    }

    #[test]
    fn test_get_redacted_not_ready_then_ready() {
        let (_dir, surface, records) = surface();
        let provisioned = surface
            .provision_upload("owner-1", "dd214.pdf", "application/pdf")
            .unwrap();
        let id = provisioned.document_id;

        assert!(matches!(
            surface.get_redacted(&id).unwrap(),
            RedactedAccess::NotReady
        ));

        records
            .set_artifact_ref(
                &id,
                crate::models::ArtifactKind::Redacted,
                crate::models::BlobRef::new("redacted-bucket", storage::redacted_key(&id)),
            )
            .unwrap();
        match surface.get_redacted(&id).unwrap() {
            RedactedAccess::Ready { url, .. } => {
                assert!(url.url.contains(&storage::redacted_key(&id)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_get_insights_reports_processing_state() {
        let (_dir, surface, _records) = surface();
        let provisioned = surface
            .provision_upload("owner-1", "dd214.pdf", "application/pdf")
            .unwrap();

        match surface.get_insights(&provisioned.document_id).unwrap() {
            InsightsResponse::Processing { current_step } => {
                assert_eq!(current_step, Some(StepName::Upload));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_get_record_not_found() {
        let (_dir, surface, _records) = surface();
        assert!(matches!(
            surface.get_record("ghost"),
            Err(PipelineError::NotFound(_))
        ));
    }
}
