//! Record store: one durable row per document.
//!
//! The row is the single source of truth for pipeline progress; the
//! orchestrator's in-memory view is a cache. Concurrent writers serialize
//! through compare-and-set on `updated_at` with a bounded re-read loop.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{connect, RepositoryError, Result};
use crate::models::{
    ArtifactKind, BlobRef, DocumentRecord, StepName, StepState,
};

/// How many times a writer re-reads and re-applies after losing a
/// compare-and-set race before giving up.
const MAX_CAS_RETRIES: u32 = 5;

/// Optional field changes applied together with a step-state transition.
#[derive(Debug, Default, Clone)]
pub struct StepUpdate {
    pub error_message: Option<String>,
    pub job_handle: Option<String>,
    pub note: Option<String>,
}

impl StepUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn job_handle(handle: impl Into<String>) -> Self {
        Self {
            job_handle: Some(handle.into()),
            ..Default::default()
        }
    }

    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }
}

/// SQLite-backed document record store.
pub struct RecordStore {
    db_path: PathBuf,
}

impl RecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                ttl TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_ttl ON documents(ttl);
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
        "#,
        )?;
        Ok(())
    }

    /// Insert a fresh record. Fails with `AlreadyExists` if the id is taken;
    /// document ids are assigned once and never reassigned.
    pub fn create(&self, record: &DocumentRecord) -> Result<()> {
        let conn = connect(&self.db_path)?;
        let json = serde_json::to_string(record)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents
                 (document_id, owner_id, status, record, created_at, updated_at, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.document_id,
                record.owner_id,
                record.status.as_str(),
                json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.ttl.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Err(RepositoryError::AlreadyExists(record.document_id.clone()));
        }
        Ok(())
    }

    /// Fetch a record by id.
    pub fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let conn = connect(&self.db_path)?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetch a record, erroring when absent.
    pub fn get_required(&self, document_id: &str) -> Result<DocumentRecord> {
        self.get(document_id)?
            .ok_or_else(|| RepositoryError::NotFound(document_id.to_string()))
    }

    /// Atomic read-modify-write with compare-and-set on `updated_at`.
    ///
    /// `apply` runs against a fresh copy of the row on every attempt, so a
    /// writer that loses the race re-applies its change to the winner's
    /// view instead of clobbering it.
    pub fn update<F>(&self, document_id: &str, mut apply: F) -> Result<DocumentRecord>
    where
        F: FnMut(&mut DocumentRecord) -> Result<()>,
    {
        for attempt in 0..MAX_CAS_RETRIES {
            let mut record = self.get_required(document_id)?;
            let expected_updated_at = record.updated_at;

            apply(&mut record)?;
            record.refresh_status();
            record.updated_at = Utc::now();
            if record.updated_at <= expected_updated_at {
                // Clock did not advance past the stored stamp; nudge it so
                // the CAS token always changes.
                record.updated_at = expected_updated_at + chrono::Duration::microseconds(1);
            }

            if self.cas_write(&record, expected_updated_at)? {
                return Ok(record);
            }
            debug!(
                document_id,
                attempt, "record CAS conflict, re-reading and retrying"
            );
        }
        Err(RepositoryError::Conflict(document_id.to_string()))
    }

    fn cas_write(&self, record: &DocumentRecord, expected: DateTime<Utc>) -> Result<bool> {
        let conn = connect(&self.db_path)?;
        let json = serde_json::to_string(record)?;
        let changed = conn.execute(
            "UPDATE documents
                SET status = ?1, record = ?2, updated_at = ?3, ttl = ?4
              WHERE document_id = ?5 AND updated_at = ?6",
            params![
                record.status.as_str(),
                json,
                record.updated_at.to_rfc3339(),
                record.ttl.to_rfc3339(),
                record.document_id,
                expected.to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Transition one step and apply the accompanying field changes.
    ///
    /// Validates the transition against the step lifecycle; an illegal
    /// transition is rejected without touching the row. Timestamps are
    /// maintained here: `started_at` on entering `in_progress`,
    /// `completed_at` on reaching `complete` or `error`.
    pub fn update_step(
        &self,
        document_id: &str,
        step: StepName,
        new_state: StepState,
        fields: StepUpdate,
    ) -> Result<DocumentRecord> {
        self.update(document_id, |record| {
            let mut info = record.step(step);
            if !info.state.can_transition(new_state) {
                return Err(RepositoryError::InvalidTransition {
                    step,
                    from: info.state,
                    to: new_state,
                });
            }
            let now = Utc::now();
            if new_state == StepState::InProgress && info.started_at.is_none() {
                info.started_at = Some(now);
            }
            if matches!(new_state, StepState::Complete | StepState::Error) {
                info.completed_at = Some(now);
            }
            info.state = new_state;
            if let Some(msg) = &fields.error_message {
                info.error_message = Some(msg.clone());
            }
            if let Some(handle) = &fields.job_handle {
                info.job_handle = Some(handle.clone());
            }
            if let Some(note) = &fields.note {
                info.note = Some(note.clone());
            }
            record.steps.insert(step, info);
            if record.derived_status().is_terminal() && record.completed_at.is_none() {
                record.completed_at = Some(now);
            }
            Ok(())
        })
    }

    /// Idempotent set of an artifact pointer.
    pub fn set_artifact_ref(
        &self,
        document_id: &str,
        which: ArtifactKind,
        blob_ref: BlobRef,
    ) -> Result<DocumentRecord> {
        self.update(document_id, |record| {
            match which {
                ArtifactKind::ExtractedText => record.extracted_text_ref = Some(blob_ref.clone()),
                ArtifactKind::Redacted => record.redacted_ref = Some(blob_ref.clone()),
                ArtifactKind::Insights => record.insights_ref = Some(blob_ref.clone()),
            }
            Ok(())
        })
    }

    /// Records whose retention deadline passed before `cutoff`.
    pub fn scan_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<DocumentRecord>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT record FROM documents WHERE ttl < ?1")?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        let mut records = Vec::with_capacity(rows.len());
        for raw in rows {
            records.push(serde_json::from_str(&raw)?);
        }
        Ok(records)
    }

    /// Most recently updated records, for status displays.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<DocumentRecord>> {
        let conn = connect(&self.db_path)?;
        let mut stmt =
            conn.prepare("SELECT record FROM documents ORDER BY updated_at DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        let mut records = Vec::with_capacity(rows.len());
        for raw in rows {
            records.push(serde_json::from_str(&raw)?);
        }
        Ok(records)
    }

    /// Remove a record row entirely.
    pub fn delete(&self, document_id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "DELETE FROM documents WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, SourceRef};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.db")).unwrap();
        (dir, store)
    }

    fn sample_record(id: &str) -> DocumentRecord {
        DocumentRecord::new(
            id.to_string(),
            "owner-1".to_string(),
            SourceRef {
                bucket: "originals".to_string(),
                key: format!("uploads/owner-1/20250101_000000_{id}.pdf"),
                content_type: "application/pdf".to_string(),
                byte_size: 2048,
                original_filename: "dd214.pdf".to_string(),
            },
            90,
        )
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = store();
        let record = sample_record("doc-1");
        store.create(&record).unwrap();

        let loaded = store.get("doc-1").unwrap().unwrap();
        assert_eq!(loaded.document_id, "doc-1");
        assert_eq!(loaded.status, DocumentStatus::PendingUpload);
        assert_eq!(loaded.steps.len(), 6);
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let (_dir, store) = store();
        let record = sample_record("doc-1");
        store.create(&record).unwrap();
        assert!(matches!(
            store.create(&record),
            Err(RepositoryError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_step_lifecycle_updates_timestamps() {
        let (_dir, store) = store();
        store.create(&sample_record("doc-1")).unwrap();

        let rec = store
            .update_step("doc-1", StepName::Ocr, StepState::InProgress, StepUpdate::job_handle("job-7"))
            .unwrap();
        let step = rec.step(StepName::Ocr);
        assert_eq!(step.state, StepState::InProgress);
        assert!(step.started_at.is_some());
        assert_eq!(step.job_handle.as_deref(), Some("job-7"));

        let rec = store
            .update_step("doc-1", StepName::Ocr, StepState::Complete, StepUpdate::default())
            .unwrap();
        let step = rec.step(StepName::Ocr);
        assert_eq!(step.state, StepState::Complete);
        assert!(step.completed_at.is_some());
        assert_eq!(rec.status, DocumentStatus::TextractComplete);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let (_dir, store) = store();
        store.create(&sample_record("doc-1")).unwrap();

        // pending -> complete skips in_progress
        assert!(matches!(
            store.update_step("doc-1", StepName::Ocr, StepState::Complete, StepUpdate::default()),
            Err(RepositoryError::InvalidTransition { .. })
        ));

        // complete -> in_progress regresses
        store
            .update_step("doc-1", StepName::Ocr, StepState::InProgress, StepUpdate::default())
            .unwrap();
        store
            .update_step("doc-1", StepName::Ocr, StepState::Complete, StepUpdate::default())
            .unwrap();
        assert!(matches!(
            store.update_step("doc-1", StepName::Ocr, StepState::InProgress, StepUpdate::default()),
            Err(RepositoryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_error_message_recorded_and_status_error() {
        let (_dir, store) = store();
        store.create(&sample_record("doc-1")).unwrap();
        store
            .update_step("doc-1", StepName::Ocr, StepState::InProgress, StepUpdate::default())
            .unwrap();
        let rec = store
            .update_step(
                "doc-1",
                StepName::Ocr,
                StepState::Error,
                StepUpdate::error("OCR poll timeout after 300s"),
            )
            .unwrap();
        assert_eq!(rec.status, DocumentStatus::Error);
        assert_eq!(
            rec.step(StepName::Ocr).error_message.as_deref(),
            Some("OCR poll timeout after 300s")
        );
        assert!(rec.completed_at.is_some());
    }

    #[test]
    fn test_set_artifact_ref_idempotent() {
        let (_dir, store) = store();
        store.create(&sample_record("doc-1")).unwrap();

        let blob = BlobRef::new("redacted-bucket", "redacted/doc-1/dd214_redacted.txt");
        store
            .set_artifact_ref("doc-1", ArtifactKind::Redacted, blob.clone())
            .unwrap();
        let rec = store
            .set_artifact_ref("doc-1", ArtifactKind::Redacted, blob.clone())
            .unwrap();
        assert_eq!(rec.redacted_ref, Some(blob));
    }

    #[test]
    fn test_concurrent_updates_both_land() {
        // Two interleaved writers touching different fields must compose:
        // the CAS loop re-reads and re-applies on conflict.
        let (_dir, store) = store();
        store.create(&sample_record("doc-1")).unwrap();

        store
            .update("doc-1", |rec| {
                rec.extracted_fields
                    .insert("service_branch".to_string(), "ARMY".to_string());
                Ok(())
            })
            .unwrap();
        store
            .update("doc-1", |rec| {
                rec.extracted_fields
                    .insert("pay_grade".to_string(), "E-6".to_string());
                Ok(())
            })
            .unwrap();

        let rec = store.get("doc-1").unwrap().unwrap();
        assert_eq!(rec.extracted_fields.len(), 2);
    }

    #[test]
    fn test_scan_expired_and_delete() {
        let (_dir, store) = store();
        let mut expired = sample_record("old-doc");
        expired.ttl = Utc::now() - chrono::Duration::days(1);
        store.create(&expired).unwrap();
        store.create(&sample_record("fresh-doc")).unwrap();

        let hits = store.scan_expired(Utc::now()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "old-doc");

        store.delete("old-doc").unwrap();
        assert!(store.get("old-doc").unwrap().is_none());
        assert!(store.get("fresh-doc").unwrap().is_some());
    }
}
