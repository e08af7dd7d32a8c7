//! PII detection and redaction.
//!
//! Detection combines always-on pattern rules with an optional external
//! entity classifier; redaction rewrites the extracted text with
//! `[REDACTED-<KIND>]` markers inside a fixed artifact frame.

mod detector;
mod patterns;
mod redactor;

pub use detector::{
    always_redact_findings, ClassifiedEntity, ClassifierError, EntityClassifier,
    HttpEntityClassifier, PiiDetection, PiiDetector, CLASSIFIER_FALLBACK_NOTE,
    CLASSIFIER_SLICE_LIMIT,
};
pub use patterns::{
    PiiPatternDef, StructuralPatternDef, ALWAYS_REDACT_FIELDS, GENERAL_PII_PATTERNS,
    STRUCTURAL_PATTERNS,
};
pub use redactor::{
    contains_residual_pii, redact, redact_unavailable, RedactedArtifact, HEADER_MARK,
    UNAVAILABLE_TEXT,
};
