//! The per-document execution state machine.
//!
//! One execution drives one document through upload confirmation,
//! validation, OCR, PII detection, redaction, and insight generation.
//! Every stage writes its step update to the record store before the
//! execution moves on, so the record is a correct progress reflection
//! even if the process dies mid-flight. Completed steps with valid
//! artifact pointers are skipped on re-entry, which makes executions
//! resumable and re-runs idempotent.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{PipelineError, Result};
use crate::config::Config;
use crate::insights::InsightGenerator;
use crate::models::{
    ArtifactKind, BlobRef, DocumentRecord, StepName, StepState,
};
use crate::ocr::{fetch_all, OcrAdapter, OcrClient, OcrPoll, OcrStageResult};
use crate::pii::{redact, redact_unavailable, PiiDetector};
use crate::repository::{InsightsStore, RecordStore, StepUpdate};
use crate::storage::{self, BlobStore, ALLOWED_EXTENSIONS};

/// Logical bucket name recorded on `insights_ref` pointers; the artifact
/// itself lives in the insights store keyed by document id.
pub const INSIGHTS_STORE_BUCKET: &str = "career-insights";

/// Named states of one execution, for tracing and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Ingested,
    Validated,
    OcrStarted,
    OcrPolling,
    OcrComplete,
    PiiDetected,
    Redacted,
    InsightsComplete,
    Done,
    Failed(StepName, String),
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::Validated => "validated",
            Self::OcrStarted => "ocr_started",
            Self::OcrPolling => "ocr_polling",
            Self::OcrComplete => "ocr_complete",
            Self::PiiDetected => "pii_detected",
            Self::Redacted => "redacted",
            Self::InsightsComplete => "insights_complete",
            Self::Done => "done",
            Self::Failed(..) => "failed",
        }
    }
}

/// Everything stage workers need, injected once.
pub struct PipelineContext {
    pub config: Config,
    pub records: Arc<RecordStore>,
    pub insights: Arc<InsightsStore>,
    pub blob: Arc<dyn BlobStore>,
    pub ocr: Arc<dyn OcrClient>,
    pub detector: PiiDetector,
    pub generator: InsightGenerator,
}

impl PipelineContext {
    /// Wire production adapters from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let records = Arc::new(RecordStore::new(config.database_path())?);
        let insights = Arc::new(InsightsStore::new(config.database_path())?);
        let blob: Arc<dyn BlobStore> = Arc::new(crate::storage::FsBlobStore::new(config.blob_root())?);

        let ocr_timeout = Duration::from_secs(config.ocr.request_timeout_seconds);
        let ocr: Arc<dyn OcrClient> =
            Arc::new(crate::ocr::HttpOcrClient::new(&config.ocr.endpoint, ocr_timeout)?);

        let detector = if config.pii.classifier_enabled {
            let endpoint = config
                .pii
                .classifier_endpoint
                .as_deref()
                .unwrap_or_default();
            let classifier = crate::pii::HttpEntityClassifier::new(
                endpoint,
                Duration::from_secs(config.pii.classifier_timeout_seconds),
            )?;
            PiiDetector::with_classifier(
                Arc::new(classifier),
                Duration::from_secs(config.pii.classifier_timeout_seconds),
            )
        } else {
            PiiDetector::new()
        };

        let transport = crate::llm::HttpLlmTransport::new(
            &config.llm.endpoint,
            Duration::from_secs(config.llm.request_timeout_seconds),
        )?;
        let client = crate::llm::LlmClient::new(Arc::new(transport)).with_retry_policy(
            config.orchestrator.max_stage_retries,
            Duration::from_millis(config.orchestrator.retry_base_delay_ms),
        );
        let generator =
            InsightGenerator::new(client, config.llm.model_id.clone(), config.llm.variants.clone());

        Ok(Self {
            config,
            records,
            insights,
            blob,
            ocr,
            detector,
            generator,
        })
    }

    /// Control surface view over this context's stores.
    pub fn control_surface(&self) -> super::ControlSurface {
        super::ControlSurface::new(
            self.config.clone(),
            self.records.clone(),
            self.insights.clone(),
            self.blob.clone(),
        )
    }
}

/// Drives one document at a time through the pipeline.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Run (or resume) the execution for a document.
    ///
    /// Returns the final record. A stage failure halts the execution with
    /// the record in a terminal `error` state; later stages are not
    /// attempted.
    pub async fn run(&self, document_id: &str) -> Result<DocumentRecord> {
        let budget = Duration::from_secs(self.ctx.config.orchestrator.execution_budget_seconds);
        let deadline = Instant::now() + budget;
        self.trace(document_id, &ExecutionState::Ingested);

        self.confirm_upload(document_id).await?;
        self.check_budget(document_id, StepName::Validation, deadline)?;
        self.validate(document_id).await?;
        self.trace(document_id, &ExecutionState::Validated);

        self.check_budget(document_id, StepName::Ocr, deadline)?;
        let ocr_result = self.ocr_stage(document_id, deadline).await?;
        self.trace(document_id, &ExecutionState::OcrComplete);

        self.check_budget(document_id, StepName::PiiDetection, deadline)?;
        self.pii_stage(document_id, ocr_result.as_ref()).await?;
        self.trace(document_id, &ExecutionState::PiiDetected);

        self.check_budget(document_id, StepName::Redaction, deadline)?;
        self.redaction_stage(document_id, ocr_result.as_ref()).await?;
        self.trace(document_id, &ExecutionState::Redacted);

        self.check_budget(document_id, StepName::Insights, deadline)?;
        self.insights_stage(document_id).await?;
        self.trace(document_id, &ExecutionState::InsightsComplete);

        let record = self.ctx.records.get_required(document_id)?;
        self.trace(document_id, &ExecutionState::Done);
        info!(document_id, status = record.status.as_str(), "execution finished");
        Ok(record)
    }

    fn trace(&self, document_id: &str, state: &ExecutionState) {
        debug!(document_id, state = state.as_str(), "execution state");
    }

    /// Budget expiry between stages terminates the execution with the
    /// upcoming stage marked as timed out.
    fn check_budget(
        &self,
        document_id: &str,
        step: StepName,
        deadline: Instant,
    ) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(self.fail_step(document_id, step, "execution budget exceeded (timeout)"));
        }
        Ok(())
    }

    /// Record a stage failure and produce the halting error.
    fn fail_step(&self, document_id: &str, step: StepName, message: &str) -> PipelineError {
        warn!(document_id, step = step.as_str(), message, "stage failed");
        let update = self.ctx.records.update_step(
            document_id,
            step,
            StepState::Error,
            StepUpdate::error(message),
        );
        if let Err(e) = update {
            warn!(document_id, error = %e, "failed to record stage error");
        }
        PipelineError::StageFailed {
            step,
            message: message.to_string(),
        }
    }

    /// Upload step: confirm the original blob actually exists.
    async fn confirm_upload(&self, document_id: &str) -> Result<()> {
        let record = self.ctx.records.get_required(document_id)?;
        if record.step(StepName::Upload).state == StepState::Complete {
            debug!(document_id, "upload already confirmed, skipping");
            return Ok(());
        }
        self.ctx.records.update_step(
            document_id,
            StepName::Upload,
            StepState::InProgress,
            StepUpdate::default(),
        )?;

        let head = self
            .ctx
            .blob
            .head(&record.source_ref.bucket, &record.source_ref.key)
            .await;
        match head {
            Ok(meta) => {
                self.ctx.records.update(document_id, |rec| {
                    rec.source_ref.byte_size = meta.byte_size;
                    Ok(())
                })?;
                self.ctx.records.update_step(
                    document_id,
                    StepName::Upload,
                    StepState::Complete,
                    StepUpdate::default(),
                )?;
                Ok(())
            }
            Err(e) => Err(self.fail_step(
                document_id,
                StepName::Upload,
                &format!("original object missing: {e}"),
            )),
        }
    }

    /// Validation step: extension and size limits on the original.
    async fn validate(&self, document_id: &str) -> Result<()> {
        let record = self.ctx.records.get_required(document_id)?;
        if record.step(StepName::Validation).state == StepState::Complete {
            debug!(document_id, "validation already complete, skipping");
            return Ok(());
        }
        self.ctx.records.update_step(
            document_id,
            StepName::Validation,
            StepState::InProgress,
            StepUpdate::default(),
        )?;

        let key = &record.source_ref.key;
        let extension_ok = key
            .rsplit_once('.')
            .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !extension_ok {
            return Err(self.fail_step(
                document_id,
                StepName::Validation,
                &format!("unsupported file type for key {key}"),
            ));
        }
        if record.source_ref.byte_size > super::MAX_UPLOAD_BYTES {
            return Err(self.fail_step(
                document_id,
                StepName::Validation,
                &format!(
                    "file too large: {} bytes exceeds {} byte limit",
                    record.source_ref.byte_size,
                    super::MAX_UPLOAD_BYTES
                ),
            ));
        }

        self.ctx.records.update_step(
            document_id,
            StepName::Validation,
            StepState::Complete,
            StepUpdate::default(),
        )?;
        Ok(())
    }

    /// OCR stage: submit or adopt a job, poll to settlement, drain pages,
    /// persist artifacts.
    async fn ocr_stage(
        &self,
        document_id: &str,
        deadline: Instant,
    ) -> Result<Option<OcrStageResult>> {
        let record = self.ctx.records.get_required(document_id)?;
        let step = record.step(StepName::Ocr);
        if step.state == StepState::Complete && record.extracted_text_ref.is_some() {
            debug!(document_id, "OCR already complete with artifact, skipping");
            return Ok(None);
        }

        // Adopt a job an earlier execution already started rather than
        // submitting a duplicate.
        let handle = match (&step.state, &step.job_handle) {
            (StepState::InProgress, Some(handle)) => {
                info!(document_id, job_handle = %handle, "adopting existing OCR job");
                handle.clone()
            }
            _ => {
                let handle = self.start_ocr_with_retries(&record).await.map_err(|e| {
                    self.fail_step(document_id, StepName::Ocr, &format!("OCR submit failed: {e}"))
                })?;
                self.ctx.records.update_step(
                    document_id,
                    StepName::Ocr,
                    StepState::InProgress,
                    StepUpdate::job_handle(handle.clone()),
                )?;
                self.trace(document_id, &ExecutionState::OcrStarted);
                handle
            }
        };

        // Poll loop with the pending ceiling and the execution budget both
        // in force.
        self.trace(document_id, &ExecutionState::OcrPolling);
        let poll_interval =
            Duration::from_secs(self.ctx.config.orchestrator.poll_interval_seconds);
        let ceiling =
            Duration::from_secs(self.ctx.config.orchestrator.ocr_pending_ceiling_seconds);
        let poll_start = Instant::now();
        let mut transient_failures = 0u32;

        loop {
            if Instant::now() >= deadline {
                let _ = self.ctx.ocr.cancel(&handle).await;
                return Err(self.fail_step(
                    document_id,
                    StepName::Ocr,
                    "execution budget exceeded (timeout)",
                ));
            }
            match self.ctx.ocr.poll(&handle).await {
                Ok(OcrPoll::Succeeded) => break,
                Ok(OcrPoll::Failed(reason)) => {
                    return Err(self.fail_step(
                        document_id,
                        StepName::Ocr,
                        &format!("OCR job failed: {reason}"),
                    ));
                }
                Ok(OcrPoll::Pending) => {
                    if poll_start.elapsed() >= ceiling {
                        // Cancel upstream if possible, then escalate.
                        let _ = self.ctx.ocr.cancel(&handle).await;
                        return Err(self.fail_step(
                            document_id,
                            StepName::Ocr,
                            &format!(
                                "OCR poll timeout after {}s pending",
                                ceiling.as_secs()
                            ),
                        ));
                    }
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) if e.is_transient() => {
                    transient_failures += 1;
                    if transient_failures > self.ctx.config.orchestrator.max_stage_retries {
                        return Err(self.fail_step(
                            document_id,
                            StepName::Ocr,
                            &format!("OCR poll failed after retries: {e}"),
                        ));
                    }
                    warn!(document_id, error = %e, "transient OCR poll failure");
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    return Err(self.fail_step(
                        document_id,
                        StepName::Ocr,
                        &format!("OCR poll failed: {e}"),
                    ));
                }
            }
        }

        let blocks = match fetch_all(self.ctx.ocr.as_ref(), &handle).await {
            Ok(blocks) => blocks,
            Err(e) => {
                return Err(self.fail_step(
                    document_id,
                    StepName::Ocr,
                    &format!("OCR result fetch failed: {e}"),
                ));
            }
        };

        let adapter = OcrAdapter::new(
            self.ctx.blob.clone(),
            self.ctx.config.blob.originals_bucket.clone(),
            self.ctx.config.ocr.max_pages,
        );
        let result = adapter
            .persist_results(document_id, &handle, blocks)
            .await
            .map_err(|e| {
                self.fail_step(
                    document_id,
                    StepName::Ocr,
                    &format!("persisting OCR results failed: {e}"),
                )
            })?;

        let fields = result.extracted_fields.clone();
        let text_ref = result.text_ref.clone();
        self.ctx.records.update(document_id, |rec| {
            rec.extracted_fields.extend(fields.clone());
            rec.extracted_text_ref = Some(text_ref.clone());
            Ok(())
        })?;
        self.ctx.records.update_step(
            document_id,
            StepName::Ocr,
            StepState::Complete,
            StepUpdate::default(),
        )?;
        Ok(Some(result))
    }

    async fn start_ocr_with_retries(
        &self,
        record: &DocumentRecord,
    ) -> crate::ocr::Result<String> {
        let source = BlobRef::new(
            record.source_ref.bucket.clone(),
            record.source_ref.key.clone(),
        );
        let max_retries = self.ctx.config.orchestrator.max_stage_retries;
        let base = Duration::from_millis(self.ctx.config.orchestrator.retry_base_delay_ms);
        let mut attempt = 0;
        loop {
            match self.ctx.ocr.start(&source).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "transient OCR submit failure");
                    tokio::time::sleep(base * (1 << attempt.min(6))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// PII detection stage.
    async fn pii_stage(
        &self,
        document_id: &str,
        ocr_result: Option<&OcrStageResult>,
    ) -> Result<()> {
        let record = self.ctx.records.get_required(document_id)?;
        if record.step(StepName::PiiDetection).state == StepState::Complete {
            debug!(document_id, "PII detection already complete, skipping");
            return Ok(());
        }
        self.ctx.records.update_step(
            document_id,
            StepName::PiiDetection,
            StepState::InProgress,
            StepUpdate::default(),
        )?;

        let text = self
            .obtain_text(&record, ocr_result)
            .await
            .unwrap_or_default();
        let detection = self.ctx.detector.detect(&text).await;
        let findings = detection.findings.clone();
        let no_pii = findings.is_empty();
        self.ctx.records.update(document_id, |rec| {
            rec.pii_findings = findings.clone();
            rec.no_pii = no_pii;
            Ok(())
        })?;

        let fields = match detection.note {
            Some(note) => StepUpdate::note(note),
            None => StepUpdate::default(),
        };
        self.ctx.records.update_step(
            document_id,
            StepName::PiiDetection,
            StepState::Complete,
            fields,
        )?;
        Ok(())
    }

    /// Redaction stage.
    async fn redaction_stage(
        &self,
        document_id: &str,
        ocr_result: Option<&OcrStageResult>,
    ) -> Result<()> {
        let record = self.ctx.records.get_required(document_id)?;
        if record.step(StepName::Redaction).state == StepState::Complete
            && record.redacted_ref.is_some()
        {
            debug!(document_id, "redaction already complete with artifact, skipping");
            return Ok(());
        }
        self.ctx.records.update_step(
            document_id,
            StepName::Redaction,
            StepState::InProgress,
            StepUpdate::default(),
        )?;

        let now = chrono::Utc::now();
        let (artifact, degraded) = match self.obtain_text(&record, ocr_result).await {
            Some(text) => (redact(&text, &record.pii_findings, now), false),
            None => {
                warn!(document_id, "source text unavailable, writing placeholder redaction");
                (redact_unavailable(now), true)
            }
        };

        let key = storage::redacted_key(document_id);
        let bucket = self.ctx.config.blob.redacted_bucket.clone();
        self.ctx
            .blob
            .put(&bucket, &key, artifact.content.as_bytes(), "text/plain")
            .await?;

        self.ctx.records.update(document_id, |rec| {
            rec.redaction_degraded = degraded;
            Ok(())
        })?;
        self.ctx.records.set_artifact_ref(
            document_id,
            ArtifactKind::Redacted,
            BlobRef::new(bucket.clone(), key.clone()),
        )?;
        let fields = if degraded {
            StepUpdate::note("source text unavailable, placeholder written")
        } else {
            StepUpdate::default()
        };
        self.ctx.records.update_step(
            document_id,
            StepName::Redaction,
            StepState::Complete,
            fields,
        )?;
        Ok(())
    }

    /// Insights stage: generate from the redacted artifact only.
    async fn insights_stage(&self, document_id: &str) -> Result<()> {
        let record = self.ctx.records.get_required(document_id)?;
        if record.step(StepName::Insights).state == StepState::Complete
            && record.insights_ref.is_some()
        {
            debug!(document_id, "insights already complete, skipping");
            return Ok(());
        }
        let Some(redacted_ref) = record.redacted_ref.clone() else {
            return Err(self.fail_step(
                document_id,
                StepName::Insights,
                "redacted artifact missing",
            ));
        };
        self.ctx.records.update_step(
            document_id,
            StepName::Insights,
            StepState::InProgress,
            StepUpdate::default(),
        )?;

        let redacted_text = match self.ctx.blob.get(&redacted_ref.bucket, &redacted_ref.key).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return Err(self.fail_step(
                    document_id,
                    StepName::Insights,
                    &format!("cannot read redacted artifact: {e}"),
                ));
            }
        };

        let generated = self
            .ctx
            .generator
            .generate(
                document_id,
                &redacted_text,
                &record.extracted_fields,
                rotation_seed(document_id),
            )
            .await;

        self.ctx
            .insights
            .put(
                document_id,
                &generated.profile,
                &generated.artifact,
                record.ttl,
            )?;

        let fallback = generated.fallback;
        self.ctx.records.update(document_id, |rec| {
            rec.insights_fallback = fallback;
            Ok(())
        })?;
        self.ctx.records.set_artifact_ref(
            document_id,
            ArtifactKind::Insights,
            BlobRef::new(INSIGHTS_STORE_BUCKET, document_id),
        )?;
        let fields = if fallback {
            StepUpdate::note("fallback artifact generated")
        } else {
            StepUpdate::default()
        };
        self.ctx.records.update_step(
            document_id,
            StepName::Insights,
            StepState::Complete,
            fields,
        )?;
        Ok(())
    }

    /// Extracted text for downstream stages: inline when the OCR stage ran
    /// in this execution and the text was small, otherwise re-read through
    /// the pointer.
    async fn obtain_text(
        &self,
        record: &DocumentRecord,
        ocr_result: Option<&OcrStageResult>,
    ) -> Option<String> {
        if let Some(result) = ocr_result {
            if let Some(text) = &result.inline_text {
                return Some(text.clone());
            }
        }
        let text_ref = record
            .extracted_text_ref
            .clone()
            .or_else(|| ocr_result.map(|r| r.text_ref.clone()))?;
        match self.ctx.blob.get(&text_ref.bucket, &text_ref.key).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!(document_id = %record.document_id, error = %e, "extracted text unavailable");
                None
            }
        }
    }
}

/// Seed for prompt rotation: document identity plus clock noise, so
/// re-analyses of the same document vary while tests with a fixed
/// composer stay deterministic.
fn rotation_seed(document_id: &str) -> u64 {
    let digest = Sha256::digest(document_id.as_bytes());
    let base = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    base ^ nanos
}
