//! Redaction of PII from extracted DD214 text.
//!
//! Order matters: DD214 structural replacements run first while the label
//! geometry is intact, general patterns second, and classifier spans last
//! in reverse offset order. The output is wrapped in a fixed header and
//! footer and is safe to feed back through the redactor — markers contain
//! nothing the patterns match and an existing wrapper is unwrapped, not
//! doubled.

use chrono::{DateTime, Utc};

use super::patterns::{COMPILED_GENERAL, COMPILED_STRUCTURAL};
use crate::models::PiiFinding;

/// First line of every redacted artifact.
pub const HEADER_MARK: &str = "=== REDACTED DD214 DOCUMENT ===";
const CONTENT_MARK: &str = "REDACTED CONTENT:\n================\n";
const FOOTER_MARK: &str = "\n================\nEND OF REDACTED DOCUMENT";

/// Placeholder body when the source text cannot be obtained.
pub const UNAVAILABLE_TEXT: &str = "Unable to retrieve document text for redaction";

/// A finished redacted artifact.
#[derive(Debug, Clone)]
pub struct RedactedArtifact {
    pub content: String,
    pub items_redacted: usize,
}

/// Redact the extracted text using the findings list.
pub fn redact(text: &str, findings: &[PiiFinding], generated_at: DateTime<Utc>) -> RedactedArtifact {
    // Re-running over an already-wrapped artifact works on its body so
    // headers never nest.
    let body = unwrap_body(text).unwrap_or(text);
    let mut redacted = body.to_string();

    for (def, re) in COMPILED_STRUCTURAL.iter() {
        redacted = re.replace_all(&redacted, def.replacement).into_owned();
    }

    for (def, re) in COMPILED_GENERAL.iter() {
        let marker = format!("[REDACTED-{}]", def.kind.marker());
        redacted = re.replace_all(&redacted, marker.as_str()).into_owned();
    }

    redacted = apply_span_findings(redacted, findings);

    RedactedArtifact {
        content: wrap(&redacted, findings.len(), generated_at),
        items_redacted: findings.len(),
    }
}

/// Artifact written when the source text is unavailable: placeholder body
/// in the standard frame, zero findings applied.
pub fn redact_unavailable(generated_at: DateTime<Utc>) -> RedactedArtifact {
    RedactedArtifact {
        content: wrap(UNAVAILABLE_TEXT, 0, generated_at),
        items_redacted: 0,
    }
}

/// Apply explicit span findings in reverse start-offset order so earlier
/// replacements do not shift later offsets.
fn apply_span_findings(mut text: String, findings: &[PiiFinding]) -> String {
    let mut spans: Vec<_> = findings
        .iter()
        .filter_map(|f| f.span.map(|span| (span, f.kind)))
        .collect();
    spans.sort_by(|a, b| b.0 .0.cmp(&a.0 .0));

    for ((start, end), kind) in spans {
        if start >= end || end > text.len() {
            continue;
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            continue;
        }
        // Pattern passes may already have rewritten this region; never
        // splice into an existing marker.
        if text[start..end].contains('[') || text[start..end].contains(']') {
            continue;
        }
        let marker = format!("[REDACTED-{}]", kind.marker());
        text.replace_range(start..end, &marker);
    }
    text
}

fn wrap(body: &str, items_redacted: usize, generated_at: DateTime<Utc>) -> String {
    format!(
        "{HEADER_MARK}\n\
         Generated: {}\n\
         PII Items Redacted: {}\n\
         \n\
         This document has been automatically redacted\n\
         to protect personally identifiable information (PII).\n\
         \n\
         {CONTENT_MARK}{}{FOOTER_MARK}\n\
         \n\
         Note: This is a redacted copy. The original document is stored securely\n\
         and is only accessible to authorized personnel.\n",
        generated_at.to_rfc3339(),
        items_redacted,
        body,
    )
}

/// Extract the body of an already-wrapped artifact, if this is one.
fn unwrap_body(text: &str) -> Option<&str> {
    if !text.starts_with(HEADER_MARK) {
        return None;
    }
    let start = text.find(CONTENT_MARK)? + CONTENT_MARK.len();
    let end = text.rfind(FOOTER_MARK)?;
    if end < start {
        return None;
    }
    Some(&text[start..end])
}

/// Whether any canonical high-risk pattern (SSN, DoD ID, email, phone)
/// still matches. Used to verify the redaction post-condition.
pub fn contains_residual_pii(text: &str) -> bool {
    COMPILED_GENERAL
        .iter()
        .filter(|(def, _)| {
            matches!(
                def.id,
                "ssn_formatted" | "ssn_plain" | "dod_id" | "email" | "phone"
            )
        })
        .any(|(_, re)| re.is_match(text))
}
