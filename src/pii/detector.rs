//! PII detection: pattern rules plus an optional external entity
//! classifier.
//!
//! The pattern rules and DD214 always-redact entries are always on;
//! classifier output only augments them. A classifier that times out or
//! fails hard leaves the stage successful with the default finding set
//! and a note on the record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::patterns::{ALWAYS_REDACT_FIELDS, COMPILED_GENERAL, COMPILED_STRUCTURAL};
use crate::models::{FindingSource, PiiFinding, PiiKind};

/// The first slice of this many characters is a sufficient classifier
/// input; the rest of the document adds nothing the patterns miss.
pub const CLASSIFIER_SLICE_LIMIT: usize = 5000;

/// Note recorded on the pii_detection step when the classifier could not
/// be consulted.
pub const CLASSIFIER_FALLBACK_NOTE: &str = "classifier unavailable, default findings applied";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Classifier returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// One entity span reported by the classifier.
#[derive(Debug, Clone)]
pub struct ClassifiedEntity {
    pub kind: PiiKind,
    pub span: (usize, usize),
    pub confidence: f64,
}

/// External entity recognizer.
#[async_trait]
pub trait EntityClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<ClassifiedEntity>, ClassifierError>;
}

/// Result of one detection pass.
#[derive(Debug, Clone)]
pub struct PiiDetection {
    pub findings: Vec<PiiFinding>,
    /// Whether classifier output contributed to the findings.
    pub classifier_used: bool,
    /// Set when the classifier was requested but unavailable.
    pub note: Option<&'static str>,
}

/// Combines pattern rules, always-redact entries, and the optional
/// classifier into one findings list.
pub struct PiiDetector {
    classifier: Option<Arc<dyn EntityClassifier>>,
    classifier_timeout: Duration,
}

impl PiiDetector {
    /// Detector with patterns only.
    pub fn new() -> Self {
        Self {
            classifier: None,
            classifier_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_classifier(
        classifier: Arc<dyn EntityClassifier>,
        classifier_timeout: Duration,
    ) -> Self {
        Self {
            classifier: Some(classifier),
            classifier_timeout,
        }
    }

    /// Detect PII in the extracted text.
    ///
    /// Never fails: every degraded path still yields the always-redact
    /// defaults so redaction coverage holds.
    pub async fn detect(&self, text: &str) -> PiiDetection {
        let mut findings = Vec::new();

        for (def, re) in COMPILED_GENERAL.iter() {
            for m in re.find_iter(text) {
                findings.push(PiiFinding {
                    kind: def.kind,
                    span: Some((m.start(), m.end())),
                    field_name: None,
                    source: FindingSource::Pattern,
                    confidence: None,
                });
            }
        }

        for (def, re) in COMPILED_STRUCTURAL.iter() {
            if re.is_match(text) {
                findings.push(PiiFinding {
                    kind: def.kind,
                    span: None,
                    field_name: Some(def.field_name.to_string()),
                    source: FindingSource::Pattern,
                    confidence: None,
                });
            }
        }

        // Guaranteed coverage regardless of what the patterns saw.
        findings.extend(always_redact_findings());

        let mut classifier_used = false;
        let mut note = None;
        if let Some(classifier) = &self.classifier {
            let slice = classifier_slice(text);
            match tokio::time::timeout(self.classifier_timeout, classifier.classify(slice)).await {
                Ok(Ok(entities)) => {
                    debug!(count = entities.len(), "classifier entities received");
                    classifier_used = true;
                    for entity in entities {
                        findings.push(PiiFinding {
                            kind: entity.kind,
                            span: Some(entity.span),
                            field_name: None,
                            source: FindingSource::Classifier,
                            confidence: Some(entity.confidence),
                        });
                    }
                }
                Ok(Err(e)) => {
                    // Hard failure handled like a timeout: defaults stand in.
                    warn!(error = %e, "classifier failed, continuing with default findings");
                    note = Some(CLASSIFIER_FALLBACK_NOTE);
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.classifier_timeout.as_secs(),
                        "classifier timed out, continuing with default findings"
                    );
                    note = Some(CLASSIFIER_FALLBACK_NOTE);
                }
            }
        }

        PiiDetection {
            findings,
            classifier_used,
            note,
        }
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The DD214 always-redact entries, which double as the deterministic
/// fallback finding set.
pub fn always_redact_findings() -> Vec<PiiFinding> {
    ALWAYS_REDACT_FIELDS
        .iter()
        .map(|(field, kind)| PiiFinding::always_redact(*kind, field))
        .collect()
}

/// First `CLASSIFIER_SLICE_LIMIT` characters at a UTF-8 boundary.
fn classifier_slice(text: &str) -> &str {
    if text.len() <= CLASSIFIER_SLICE_LIMIT {
        return text;
    }
    let mut end = CLASSIFIER_SLICE_LIMIT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// HTTP entity classifier speaking a detect-entities JSON API.
pub struct HttpEntityClassifier {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    language_code: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    entities: Vec<WireEntity>,
}

#[derive(Deserialize)]
struct WireEntity {
    #[serde(rename = "type")]
    entity_type: String,
    begin_offset: usize,
    end_offset: usize,
    #[serde(default)]
    score: f64,
}

impl HttpEntityClassifier {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClassifierError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn map_kind(entity_type: &str) -> PiiKind {
        match entity_type {
            "SSN" => PiiKind::Ssn,
            "DOD_ID" => PiiKind::DodId,
            "DATE" | "DATE_OF_BIRTH" => PiiKind::DateOfBirth,
            "ADDRESS" | "LOCATION" => PiiKind::Address,
            "NAME" | "PERSON" => PiiKind::Name,
            "EMAIL" => PiiKind::Email,
            "PHONE" | "PHONE_NUMBER" => PiiKind::Phone,
            _ => PiiKind::Other,
        }
    }
}

#[async_trait]
impl EntityClassifier for HttpEntityClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<ClassifiedEntity>, ClassifierError> {
        let url = format!("{}/entities", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&ClassifyRequest {
                text,
                language_code: "en",
            })
            .send()
            .await
            .map_err(|e| ClassifierError::Connection(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;
        Ok(body
            .entities
            .into_iter()
            .map(|e| ClassifiedEntity {
                kind: Self::map_kind(&e.entity_type),
                span: (e.begin_offset, e.end_offset),
                confidence: e.score,
            })
            .collect())
    }
}
