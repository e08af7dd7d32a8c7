//! Document record models for DD214 processing state.
//!
//! One record tracks one uploaded document through the whole pipeline:
//! per-step state, extracted fields, PII findings, and pointers to the
//! artifacts each stage leaves in the blob store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Overall processing status of a document.
///
/// Status is a monotone function of the step map; it never regresses
/// within or across executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    PendingUpload,
    Uploaded,
    Processing,
    TextractComplete,
    MacieComplete,
    InsightsComplete,
    Complete,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingUpload => "pending_upload",
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::TextractComplete => "textract_complete",
            Self::MacieComplete => "macie_complete",
            Self::InsightsComplete => "insights_complete",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_upload" => Some(Self::PendingUpload),
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "textract_complete" => Some(Self::TextractComplete),
            "macie_complete" => Some(Self::MacieComplete),
            "insights_complete" => Some(Self::InsightsComplete),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Ordering rank used to enforce monotonicity. `Error` is terminal
    /// and compares above everything else.
    pub fn rank(&self) -> u8 {
        match self {
            Self::PendingUpload => 0,
            Self::Uploaded => 1,
            Self::Processing => 2,
            Self::TextractComplete => 3,
            Self::MacieComplete => 4,
            Self::InsightsComplete => 5,
            Self::Complete => 6,
            Self::Error => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Named pipeline steps recorded per document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Upload,
    Validation,
    Ocr,
    PiiDetection,
    Redaction,
    Insights,
}

impl StepName {
    /// All steps in pipeline order.
    pub const ALL: [StepName; 6] = [
        StepName::Upload,
        StepName::Validation,
        StepName::Ocr,
        StepName::PiiDetection,
        StepName::Redaction,
        StepName::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Validation => "validation",
            Self::Ocr => "ocr",
            Self::PiiDetection => "pii_detection",
            Self::Redaction => "redaction",
            Self::Insights => "insights",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "validation" => Some(Self::Validation),
            "ocr" => Some(Self::Ocr),
            "pii_detection" => Some(Self::PiiDetection),
            "redaction" => Some(Self::Redaction),
            "insights" => Some(Self::Insights),
            _ => None,
        }
    }
}

/// State of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// `Complete` is only reachable from `InProgress`; `Error` from any
    /// non-terminal state; a completed step never reopens.
    pub fn can_transition(&self, to: StepState) -> bool {
        match (self, to) {
            (a, b) if *a == b => true,
            (Self::Pending, Self::InProgress) => true,
            (Self::InProgress, Self::Complete) => true,
            (Self::Pending | Self::InProgress, Self::Error) => true,
            _ => false,
        }
    }
}

/// Per-step progress entry stored on the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Handle of an external async job (OCR, classifier) owned by this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<String>,
    /// Free-form marker for degraded paths (fallback findings, placeholder
    /// redaction, fallback insights).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StepInfo {
    pub fn pending() -> Self {
        Self {
            state: StepState::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            job_handle: None,
            note: None,
        }
    }
}

impl Default for StepInfo {
    fn default() -> Self {
        Self::pending()
    }
}

/// Location and identity of the original uploaded blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub byte_size: u64,
    pub original_filename: String,
}

/// Pointer to an artifact in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("blob://{}/{}", self.bucket, self.key)
    }
}

/// Which artifact pointer on the record to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ExtractedText,
    Redacted,
    Insights,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractedText => "extracted_text",
            Self::Redacted => "redacted",
            Self::Insights => "insights",
        }
    }
}

/// Category of a detected PII item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiKind {
    Ssn,
    DodId,
    DateOfBirth,
    Address,
    Name,
    Email,
    Phone,
    ServiceNumber,
    VaFileNumber,
    Other,
}

impl PiiKind {
    /// Marker text used inside redaction placeholders.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Ssn => "SSN",
            Self::DodId => "DOD_ID",
            Self::DateOfBirth => "DOB",
            Self::Address => "ADDRESS",
            Self::Name => "NAME",
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::ServiceNumber => "SERVICE_NUMBER",
            Self::VaFileNumber => "VA_FILE_NUMBER",
            Self::Other => "PII",
        }
    }
}

/// Where a PII finding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Pattern,
    Classifier,
    AlwaysRedact,
}

/// A single PII finding. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFinding {
    pub kind: PiiKind,
    /// Byte offsets `[start, end)` into the extracted text, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
    /// DD214 field label the finding is anchored to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub source: FindingSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl PiiFinding {
    pub fn always_redact(kind: PiiKind, field_name: &str) -> Self {
        Self {
            kind,
            span: None,
            field_name: Some(field_name.to_string()),
            source: FindingSource::AlwaysRedact,
            confidence: None,
        }
    }
}

/// A document's full processing record.
///
/// Created by the upload provisioner in `pending_upload`, mutated only by
/// the orchestrator and its stage workers, read by the control surface,
/// deleted by the TTL sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_ref: SourceRef,
    pub status: DocumentStatus,
    pub steps: BTreeMap<StepName, StepInfo>,
    /// Sparse map of extracted DD214 field name to raw string value.
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text_ref: Option<BlobRef>,
    #[serde(default)]
    pub pii_findings: Vec<PiiFinding>,
    /// Set when detection ran and found nothing; pairs with the invariant
    /// that a redacted artifact implies findings or this marker.
    #[serde(default)]
    pub no_pii: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_ref: Option<BlobRef>,
    /// True when the redactor could not obtain source text and wrote the
    /// placeholder artifact instead.
    #[serde(default)]
    pub redaction_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights_ref: Option<BlobRef>,
    /// True when the insight artifact is the static fallback.
    #[serde(default)]
    pub insights_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Retention deadline; the sweep deletes the record and its blobs after
    /// this instant.
    pub ttl: DateTime<Utc>,
}

impl DocumentRecord {
    /// Create a fresh record in `pending_upload` with every step pending.
    pub fn new(document_id: String, owner_id: String, source_ref: SourceRef, ttl_days: i64) -> Self {
        let now = Utc::now();
        let steps = StepName::ALL
            .iter()
            .map(|s| (*s, StepInfo::pending()))
            .collect();
        Self {
            document_id,
            owner_id,
            created_at: now,
            updated_at: now,
            source_ref,
            status: DocumentStatus::PendingUpload,
            steps,
            extracted_fields: BTreeMap::new(),
            extracted_text_ref: None,
            pii_findings: Vec::new(),
            no_pii: false,
            redacted_ref: None,
            redaction_degraded: false,
            insights_ref: None,
            insights_fallback: false,
            execution_handle: None,
            processing_started_at: None,
            completed_at: None,
            ttl: now + Duration::days(ttl_days),
        }
    }

    /// Step entry, tolerating rows written before a step was introduced.
    pub fn step(&self, name: StepName) -> StepInfo {
        self.steps.get(&name).cloned().unwrap_or_default()
    }

    /// Derive the status implied by the current step map.
    ///
    /// `complete` iff every step is complete; `error` iff any step errored.
    /// Intermediate markers follow the furthest completed stage.
    pub fn derived_status(&self) -> DocumentStatus {
        if self.steps.values().any(|s| s.state == StepState::Error) {
            return DocumentStatus::Error;
        }
        if StepName::ALL
            .iter()
            .all(|n| self.step(*n).state == StepState::Complete)
        {
            return DocumentStatus::Complete;
        }
        if self.step(StepName::Insights).state == StepState::Complete {
            return DocumentStatus::InsightsComplete;
        }
        if self.step(StepName::PiiDetection).state == StepState::Complete {
            return DocumentStatus::MacieComplete;
        }
        if self.step(StepName::Ocr).state == StepState::Complete {
            return DocumentStatus::TextractComplete;
        }
        if self.processing_started_at.is_some() {
            return DocumentStatus::Processing;
        }
        if self.step(StepName::Upload).state == StepState::Complete {
            return DocumentStatus::Uploaded;
        }
        DocumentStatus::PendingUpload
    }

    /// Recompute `status` from the step map without ever regressing it.
    pub fn refresh_status(&mut self) {
        let derived = self.derived_status();
        if derived.rank() > self.status.rank() {
            self.status = derived;
        }
    }
}
