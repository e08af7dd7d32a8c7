//! End-to-end pipeline scenarios over scripted service fakes.
//!
//! Each test provisions an upload, stores the original, fires the
//! blob-create event, and drives the orchestrator with fake OCR and LLM
//! backends. No network is involved.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use vetintel::config::Config;
use vetintel::insights::{InsightGenerator, ANALYSIS_METHOD_FALLBACK, ANALYSIS_METHOD_PRIMARY};
use vetintel::llm::{ConverseRequest, LlmClient, LlmError, LlmTransport};
use vetintel::models::{DocumentStatus, FindingSource, StepName, StepState};
use vetintel::ocr::{Block, OcrClient, OcrError, OcrPage, OcrPoll};
use vetintel::pii::{contains_residual_pii, PiiDetector, ALWAYS_REDACT_FIELDS};
use vetintel::pipeline::{
    BlobEvent, IngressOutcome, IngressTrigger, Orchestrator, PipelineContext, PipelineError,
    RedactedAccess,
};
use vetintel::pipeline::InsightsResponse;
use vetintel::repository::{InsightsStore, RecordStore};
use vetintel::storage::{self, BlobStore, FsBlobStore};

// ---------------------------------------------------------------------
// Scripted fakes
// ---------------------------------------------------------------------

#[derive(Clone)]
enum OcrMode {
    /// Report pending for N polls, then succeed.
    Succeed { pending_polls: u32 },
    /// Never leave pending.
    StayPending,
    /// Fail the job with a reason.
    FailJob(String),
}

struct ScriptedOcr {
    pages: Vec<Vec<Block>>,
    mode: OcrMode,
    starts: AtomicU32,
    polls: AtomicU32,
    cancels: AtomicU32,
}

impl ScriptedOcr {
    fn new(pages: Vec<Vec<Block>>, mode: OcrMode) -> Self {
        Self {
            pages,
            mode,
            starts: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl OcrClient for ScriptedOcr {
    async fn start(&self, _source: &vetintel::models::BlobRef) -> vetintel::ocr::Result<String> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{n}"))
    }

    async fn poll(&self, _handle: &str) -> vetintel::ocr::Result<OcrPoll> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            OcrMode::Succeed { pending_polls } => {
                if polls < *pending_polls {
                    Ok(OcrPoll::Pending)
                } else {
                    Ok(OcrPoll::Succeeded)
                }
            }
            OcrMode::StayPending => Ok(OcrPoll::Pending),
            OcrMode::FailJob(reason) => Ok(OcrPoll::Failed(reason.clone())),
        }
    }

    async fn fetch_page(
        &self,
        _handle: &str,
        token: Option<&str>,
    ) -> vetintel::ocr::Result<OcrPage> {
        let index: usize = match token {
            None => 0,
            Some(t) => t
                .strip_prefix("tok-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| OcrError::Parse(format!("bad token {t}")))?,
        };
        let blocks = self
            .pages
            .get(index)
            .cloned()
            .ok_or_else(|| OcrError::Parse(format!("no page {index}")))?;
        let next_token = if index + 1 < self.pages.len() {
            Some(format!("tok-{}", index + 1))
        } else {
            None
        };
        Ok(OcrPage { blocks, next_token })
    }

    async fn cancel(&self, _handle: &str) -> vetintel::ocr::Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, u16>>>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    fn with_responses(responses: Vec<Result<String, u16>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn always_unavailable() -> Arc<Self> {
        Self::with_responses(Vec::new())
    }
}

#[async_trait]
impl LlmTransport for ScriptedLlm {
    async fn converse(&self, _request: &ConverseRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => Err(LlmError::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Err(LlmError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------
// Fixture plumbing
// ---------------------------------------------------------------------

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: Arc<PipelineContext>,
    ocr: Arc<ScriptedOcr>,
    llm: Arc<ScriptedLlm>,
}

fn fixture(ocr: ScriptedOcr, llm: Arc<ScriptedLlm>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.orchestrator.poll_interval_seconds = 1;
    config.orchestrator.retry_base_delay_ms = 10;

    let records = Arc::new(RecordStore::new(config.database_path()).unwrap());
    let insights = Arc::new(InsightsStore::new(config.database_path()).unwrap());
    let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.blob_root()).unwrap());
    let ocr = Arc::new(ocr);

    let client = LlmClient::new(llm.clone()).with_retry_policy(2, Duration::from_millis(10));
    let generator = InsightGenerator::new(
        client,
        config.llm.model_id.clone(),
        config.llm.variants.clone(),
    )
    .without_extensions();

    let ctx = Arc::new(PipelineContext {
        config,
        records,
        insights,
        blob,
        ocr: ocr.clone() as Arc<dyn OcrClient>,
        detector: PiiDetector::new(),
        generator,
    });

    Fixture {
        _dir: dir,
        ctx,
        ocr,
        llm,
    }
}

/// Provision, upload the original, and fire the blob-create event.
async fn provision_and_trigger(fixture: &Fixture) -> String {
    let surface = fixture.ctx.control_surface();
    let provisioned = surface
        .provision_upload("owner-1", "dd214.pdf", "application/pdf")
        .unwrap();

    fixture
        .ctx
        .blob
        .put(
            &fixture.ctx.config.blob.originals_bucket,
            &provisioned.key,
            b"%PDF-1.4 fake scan bytes",
            "application/pdf",
        )
        .await
        .unwrap();

    let trigger = IngressTrigger::new(fixture.ctx.records.clone());
    let outcome = trigger
        .handle_event(&BlobEvent {
            bucket: fixture.ctx.config.blob.originals_bucket.clone(),
            key: provisioned.key.clone(),
        })
        .unwrap();
    match outcome {
        IngressOutcome::Started { document_id, .. } => document_id,
        other => panic!("unexpected ingress outcome: {other:?}"),
    }
}

fn dd214_pages() -> Vec<Vec<Block>> {
    let page1 = vec![
        Block {
            block_type: vetintel::ocr::BlockType::Page,
            text: None,
            confidence: None,
            page_number: Some(1),
            geometry: None,
        },
        Block::line("CERTIFICATE OF RELEASE OR DISCHARGE FROM ACTIVE DUTY", 99.2, 1),
        Block::line("2. DEPARTMENT, COMPONENT AND BRANCH OF SERVICE ARMY/RA", 98.1, 1),
        Block::line("3. SOCIAL SECURITY NUMBER 123-45-6789", 97.4, 1),
        Block::line("4a. GRADE, RATE OR RANK SSG", 98.8, 1),
        Block::line("4b. PAY GRADE E-6", 99.0, 1),
    ];
    let page2 = vec![
        Block {
            block_type: vetintel::ocr::BlockType::Page,
            text: None,
            confidence: None,
            page_number: Some(2),
            geometry: None,
        },
        Block::line("11. PRIMARY SPECIALTY 68W COMBAT MEDIC", 97.9, 2),
        Block::line("13. DECORATIONS: ARMY COMMENDATION MEDAL", 96.5, 2),
        Block::line("24. CHARACTER OF SERVICE HONORABLE", 98.2, 2),
    ];
    vec![page1, page2]
}

fn good_insights_json() -> String {
    r#"{"extracted_profile": {"branch": "ARMY", "rank": "SSG", "mos": "68W"},
        "career_recommendations": [{"title": "Clinical Operations Manager"}]}"#
        .to_string()
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

/// Happy path through every stage.
#[tokio::test(start_paused = true)]
async fn happy_path() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 2 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;

    let record = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    assert_eq!(record.status, DocumentStatus::Complete);
    for step in StepName::ALL {
        assert_eq!(record.step(step).state, StepState::Complete, "{step:?}");
    }

    // Pre-redaction field extraction landed on the record.
    assert_eq!(record.extracted_fields.get("ssn").unwrap(), "123-45-6789");
    assert_eq!(record.extracted_fields.get("service_branch").unwrap(), "ARMY");
    assert_eq!(record.extracted_fields.get("pay_grade").unwrap(), "E-6");
    assert_eq!(record.extracted_fields.get("mos").unwrap(), "68W");

    // Redacted artifact holds markers and none of the raw SSN.
    let redacted = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.redacted_bucket,
            &storage::redacted_key(&document_id),
        )
        .await
        .unwrap();
    let redacted = String::from_utf8(redacted).unwrap();
    assert!(redacted.contains("[REDACTED-SSN]"));
    assert!(!redacted.contains("123-45-6789"));
    assert!(!contains_residual_pii(&redacted));

    // Insights artifact present with a populated profile.
    let surface = fx.ctx.control_surface();
    match surface.get_insights(&document_id).unwrap() {
        InsightsResponse::Available { insights, .. } => {
            assert_eq!(insights["extracted_profile"]["branch"], "ARMY");
            assert_eq!(insights["analysis_method"], ANALYSIS_METHOD_PRIMARY);
            assert_eq!(insights["model_version"], fx.ctx.config.llm.model_id);
            assert!(insights.get("generated_at").is_some());
            // Guaranteed sections exist even when the model omitted them.
            assert!(insights.get("transition_timeline").is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }

    match surface.get_redacted(&document_id).unwrap() {
        RedactedAccess::Ready { items_redacted, .. } => assert!(items_redacted > 0),
        other => panic!("unexpected: {other:?}"),
    }
}

/// Pagination drains every page into the full-results dump, in order.
#[tokio::test(start_paused = true)]
async fn ocr_pagination_completeness() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;
    Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    let raw = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.originals_bucket,
            &storage::full_results_key(&document_id),
        )
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let expected: usize = dd214_pages().iter().map(|p| p.len()).sum();
    assert_eq!(parsed["blockCount"], expected);
    // Order preserved: page 1 content precedes page 2 content.
    let text = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.originals_bucket,
            &storage::full_text_key(&document_id),
        )
        .await
        .unwrap();
    let text = String::from_utf8(text).unwrap();
    let ssn_pos = text.find("SOCIAL SECURITY NUMBER").unwrap();
    let specialty_pos = text.find("PRIMARY SPECIALTY").unwrap();
    assert!(ssn_pos < specialty_pos);
}

/// An OCR job that stays pending past the ceiling times the stage out.
#[tokio::test(start_paused = true)]
async fn ocr_timeout() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::StayPending),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;

    let err = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            step: StepName::Ocr,
            ..
        }
    ));

    let record = fx.ctx.records.get(&document_id).unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Error);
    let step = record.step(StepName::Ocr);
    assert_eq!(step.state, StepState::Error);
    assert!(step.error_message.unwrap().contains("timeout"));

    // Upstream job cancelled, no downstream artifacts.
    assert_eq!(fx.ocr.cancels.load(Ordering::SeqCst), 1);
    assert!(record.redacted_ref.is_none());
    assert!(record.insights_ref.is_none());
    assert_eq!(fx.llm.calls.load(Ordering::SeqCst), 0);
}

/// Duplicate blob events start exactly one execution, and re-running a
/// completed record changes nothing.
#[tokio::test(start_paused = true)]
async fn retrigger_and_idempotent_rerun() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 1 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let surface = fx.ctx.control_surface();
    let provisioned = surface
        .provision_upload("owner-1", "dd214.pdf", "application/pdf")
        .unwrap();
    fx.ctx
        .blob
        .put(
            &fx.ctx.config.blob.originals_bucket,
            &provisioned.key,
            b"%PDF-1.4 fake scan bytes",
            "application/pdf",
        )
        .await
        .unwrap();

    let trigger = IngressTrigger::new(fx.ctx.records.clone());
    let event = BlobEvent {
        bucket: fx.ctx.config.blob.originals_bucket.clone(),
        key: provisioned.key.clone(),
    };
    assert!(matches!(
        trigger.handle_event(&event).unwrap(),
        IngressOutcome::Started { .. }
    ));
    // Second delivery of the same event.
    assert!(matches!(
        trigger.handle_event(&event).unwrap(),
        IngressOutcome::AlreadyExists { .. }
    ));

    let orchestrator = Orchestrator::new(fx.ctx.clone());
    let first = orchestrator.run(&provisioned.document_id).await.unwrap();
    assert_eq!(first.status, DocumentStatus::Complete);
    let starts_after_first = fx.ocr.starts.load(Ordering::SeqCst);
    let llm_after_first = fx.llm.calls.load(Ordering::SeqCst);

    // A fresh execution over the completed record skips every stage.
    let second = orchestrator.run(&provisioned.document_id).await.unwrap();
    assert_eq!(second.status, DocumentStatus::Complete);
    assert_eq!(fx.ocr.starts.load(Ordering::SeqCst), starts_after_first);
    assert_eq!(fx.llm.calls.load(Ordering::SeqCst), llm_after_first);
    assert_eq!(second.extracted_fields, first.extracted_fields);
    assert_eq!(second.redacted_ref, first.redacted_ref);
    assert_eq!(second.insights_ref, first.insights_ref);
    // Step history carries no duplicates: same six steps, still complete.
    assert_eq!(second.steps.len(), 6);
}

/// Prose-wrapped JSON is salvaged; the artifact is primary, not
/// fallback.
#[tokio::test(start_paused = true)]
async fn malformed_json_salvage() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::with_responses(vec![Ok(r#"here is your report: {"x":1}"#.to_string())]),
    );
    let document_id = provision_and_trigger(&fx).await;
    let record = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    assert_eq!(record.status, DocumentStatus::Complete);
    assert!(!record.insights_fallback);

    match fx.ctx.control_surface().get_insights(&document_id).unwrap() {
        InsightsResponse::Available { insights, .. } => {
            assert_eq!(insights["x"], 1);
            assert_eq!(insights["analysis_method"], ANALYSIS_METHOD_PRIMARY);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// A permanently unavailable LLM still completes the pipeline with a
/// JSON-valid fallback artifact.
#[tokio::test(start_paused = true)]
async fn llm_unavailable_fallback() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::always_unavailable(),
    );
    let document_id = provision_and_trigger(&fx).await;
    let record = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    assert_eq!(record.status, DocumentStatus::Complete);
    assert!(record.insights_fallback);
    assert!(record.insights_ref.is_some());
    assert_eq!(
        record.step(StepName::Insights).note.as_deref(),
        Some("fallback artifact generated")
    );

    match fx.ctx.control_surface().get_insights(&document_id).unwrap() {
        InsightsResponse::Available { insights, .. } => {
            assert_eq!(insights["analysis_method"], ANALYSIS_METHOD_FALLBACK);
            // The fallback scan found the branch in the redacted text.
            assert_eq!(insights["extracted_profile"]["branch"], "ARMY");
            assert!(insights["career_recommendations"]
                .as_array()
                .unwrap()
                .is_empty());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// Without a classifier, findings are exactly the always-redact entries
/// plus pattern hits, and nothing sensitive survives redaction.
#[tokio::test(start_paused = true)]
async fn no_classifier_findings() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;
    let record = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    let always: Vec<_> = record
        .pii_findings
        .iter()
        .filter(|f| f.source == FindingSource::AlwaysRedact)
        .collect();
    assert_eq!(always.len(), ALWAYS_REDACT_FIELDS.len());
    assert!(record
        .pii_findings
        .iter()
        .all(|f| f.source != FindingSource::Classifier));
    // At least the SSN pattern hit.
    assert!(record
        .pii_findings
        .iter()
        .any(|f| f.source == FindingSource::Pattern));

    let redacted = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.redacted_bucket,
            &storage::redacted_key(&document_id),
        )
        .await
        .unwrap();
    assert!(!contains_residual_pii(&String::from_utf8(redacted).unwrap()));
}

/// Oversized text travels by pointer and stays retrievable.
#[tokio::test(start_paused = true)]
async fn truncation_discipline() {
    let mut pages = dd214_pages();
    // Pad the document far past the inline ceiling.
    for i in 0..30 {
        pages
            .get_mut(1)
            .unwrap()
            .push(Block::line(&format!("REMARKS CONTINUATION {} {}", i, "X".repeat(200)), 95.0, 2));
    }
    let fx = fixture(
        ScriptedOcr::new(pages, OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;
    let record = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    assert_eq!(record.status, DocumentStatus::Complete);
    let text_ref = record.extracted_text_ref.clone().unwrap();
    let stored = fx.ctx.blob.get(&text_ref.bucket, &text_ref.key).await.unwrap();
    assert!(stored.len() > 5000);

    // Redaction read the full text through the pointer: late-page content
    // made it into the artifact.
    let redacted = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.redacted_bucket,
            &storage::redacted_key(&document_id),
        )
        .await
        .unwrap();
    let redacted = String::from_utf8(redacted).unwrap();
    assert!(redacted.contains("REMARKS CONTINUATION 29"));
    assert!(!redacted.contains("123-45-6789"));

    // Summary preview respected its own cap.
    let summary = fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.originals_bucket,
            &storage::extraction_summary_key(&document_id),
        )
        .await
        .unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&summary).unwrap();
    assert!(summary["rawTextPreview"].as_str().unwrap().ends_with("..."));
}

/// Permanent OCR job failure is not retried into oblivion and surfaces
/// as a stage error.
#[tokio::test(start_paused = true)]
async fn ocr_job_failure_is_stage_error() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::FailJob("document unreadable".to_string())),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;

    let err = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { .. }));

    let record = fx.ctx.records.get(&document_id).unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Error);
    assert!(record
        .step(StepName::Ocr)
        .error_message
        .unwrap()
        .contains("document unreadable"));
}

/// Status ranks never regress across a full run.
#[tokio::test(start_paused = true)]
async fn monotone_status() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 1 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;

    let before = fx.ctx.records.get(&document_id).unwrap().unwrap();
    assert_eq!(before.status, DocumentStatus::Processing);

    let after = Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();
    assert!(after.status.rank() >= before.status.rank());
    assert_eq!(after.status, DocumentStatus::Complete);
}

/// Extension variants attach under namespaced keys, and an extension
/// failure never fails the primary artifact.
#[tokio::test(start_paused = true)]
async fn extension_variants_attach_namespaced() {
    let llm = ScriptedLlm::with_responses(vec![
        Ok(good_insights_json()),
        Ok(r#"{"legacy_intelligence_report": {"headline": "A life of service"}}"#.to_string()),
        // Meta-recommendations call fails permanently; primary survives.
        Err(400),
    ]);
    let client = LlmClient::new(llm.clone()).with_retry_policy(2, Duration::from_millis(10));
    let generator = InsightGenerator::new(client, "test-model", Default::default());

    let generated = generator
        .generate("doc-x", "ARMY SSG [REDACTED-SSN]", &Default::default(), 7)
        .await;

    assert!(!generated.fallback);
    assert_eq!(
        generated.artifact["legacy_report"]["headline"],
        "A life of service"
    );
    assert!(generated.artifact.get("meta_ai_prompts").is_none());
    assert_eq!(generated.artifact["analysis_method"], ANALYSIS_METHOD_PRIMARY);
}

/// The TTL sweep removes expired records, artifacts, and insights.
#[tokio::test(start_paused = true)]
async fn ttl_sweep_removes_expired() {
    let fx = fixture(
        ScriptedOcr::new(dd214_pages(), OcrMode::Succeed { pending_polls: 0 }),
        ScriptedLlm::with_responses(vec![Ok(good_insights_json())]),
    );
    let document_id = provision_and_trigger(&fx).await;
    Orchestrator::new(fx.ctx.clone())
        .run(&document_id)
        .await
        .unwrap();

    let surface = fx.ctx.control_surface();

    // Not yet expired: nothing happens.
    let report = surface.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(report.records_deleted, 0);

    // Past the deadline: record, blobs, and insights all go.
    let report = surface
        .sweep_expired(Utc::now() + chrono::Duration::days(91))
        .await
        .unwrap();
    assert_eq!(report.records_deleted, 1);
    assert!(report.blobs_deleted >= 4);
    assert!(fx.ctx.records.get(&document_id).unwrap().is_none());
    assert!(fx.ctx.insights.get(&document_id).unwrap().is_none());
    assert!(fx
        .ctx
        .blob
        .get(
            &fx.ctx.config.blob.redacted_bucket,
            &storage::redacted_key(&document_id)
        )
        .await
        .is_err());
}
