//! Canonical PII pattern definitions.
//!
//! Single source of truth for both the detector and the redactor. General
//! patterns are applied in declared order — the 10-digit DoD ID rule must
//! run before the phone rule so a bare digit run is not claimed as a
//! phone number, and the ZIP rule runs last so it only sees digit groups
//! nothing else claimed.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::PiiKind;

/// Definition of one general PII pattern.
#[derive(Debug, Clone, Copy)]
pub struct PiiPatternDef {
    /// Unique identifier for the pattern (e.g. "ssn_formatted").
    pub id: &'static str,
    pub kind: PiiKind,
    /// The regex pattern string.
    pub regex: &'static str,
    /// Human-readable description.
    pub description: &'static str,
}

/// General patterns applied to the whole text, in order.
pub static GENERAL_PII_PATTERNS: &[PiiPatternDef] = &[
    PiiPatternDef {
        id: "ssn_formatted",
        kind: PiiKind::Ssn,
        regex: r"\b\d{3}[-\s]\d{2}[-\s]\d{4}\b",
        description: "Social security numbers with separators",
    },
    PiiPatternDef {
        id: "ssn_plain",
        kind: PiiKind::Ssn,
        regex: r"\b\d{9}\b",
        description: "Bare nine-digit runs with non-digit boundaries",
    },
    PiiPatternDef {
        id: "dod_id",
        kind: PiiKind::DodId,
        regex: r"\b\d{10}\b",
        description: "Bare ten-digit DoD ID numbers",
    },
    PiiPatternDef {
        id: "service_number",
        kind: PiiKind::ServiceNumber,
        regex: r"\b[A-Z]{2}\d{7,8}\b",
        description: "Legacy military service numbers",
    },
    PiiPatternDef {
        id: "va_file_number",
        kind: PiiKind::VaFileNumber,
        regex: r"\bC\d{8}\b",
        description: "VA file numbers",
    },
    PiiPatternDef {
        id: "phone",
        kind: PiiKind::Phone,
        regex: r"\b\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        description: "North American dialing patterns",
    },
    PiiPatternDef {
        id: "email",
        kind: PiiKind::Email,
        regex: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        description: "Email addresses",
    },
    PiiPatternDef {
        id: "zip",
        kind: PiiKind::Other,
        regex: r"\b\d{5}(-\d{4})?\b",
        description: "ZIP codes, which narrow location",
    },
];

/// Definition of a DD214 structural pattern.
///
/// Anchored on the numbered field labels the OCR stream emits; the
/// replacement keeps the label (group 1) and drops the value lines.
#[derive(Debug, Clone, Copy)]
pub struct StructuralPatternDef {
    pub id: &'static str,
    pub kind: PiiKind,
    /// Field label recorded on findings from this pattern.
    pub field_name: &'static str,
    pub regex: &'static str,
    /// Replacement template; `${1}` is the preserved label prefix.
    pub replacement: &'static str,
}

/// Label-anchored DD214 replacements, applied before the general patterns.
pub static STRUCTURAL_PATTERNS: &[StructuralPatternDef] = &[
    StructuralPatternDef {
        id: "dd214_ssn_block",
        kind: PiiKind::Ssn,
        field_name: "Social Security Number",
        // SSN rendered as separate digit groups on the lines after the
        // field 3 label.
        regex: r"(?i)(3\.\s*SOCIAL SECURITY NUMBER[^\n]*\n)([^\n]+\n[^\n]+\n)(\d+\s*\n\d+\s*\n\d+)",
        replacement: "${1}${2}[REDACTED-SSN]",
    },
    StructuralPatternDef {
        id: "dd214_date_of_birth",
        kind: PiiKind::DateOfBirth,
        field_name: "Date of Birth",
        regex: r"(?i)(5\.\s*DATE OF BIRTH[^\n]*\n[^\n]*\n[^\n]*\n[^\n]*\n)(\d{8})",
        replacement: "${1}[REDACTED-DOB]",
    },
    StructuralPatternDef {
        id: "dd214_home_of_record",
        kind: PiiKind::Address,
        field_name: "Home of Record",
        regex: r"(?i)(b\.\s*HOME OF RECORD[^\n]*\n)([^\n]+\n[^\n]+\n[^\n]+)",
        replacement: "${1}[REDACTED-ADDRESS]",
    },
    StructuralPatternDef {
        id: "dd214_mailing_address",
        kind: PiiKind::Address,
        field_name: "Mailing Address After Separation",
        regex: r"(?i)(19a\.\s*MAILING ADDRESS AFTER SEPARATION[^\n]*\n)([^\n]+\n[^\n]+\n[^\n]+)",
        replacement: "${1}[REDACTED-ADDRESS]",
    },
    StructuralPatternDef {
        id: "dd214_nearest_relative",
        kind: PiiKind::Name,
        field_name: "Nearest Relative",
        regex: r"(?i)(b\.\s*NEAREST RELATIVE[^\n]*\n)([^\n]+\n[^\n]+\n[^\n]+)",
        replacement: "${1}[REDACTED-RELATIVE]",
    },
];

/// Fields redacted unconditionally, even when no pattern inside them
/// matches.
pub static ALWAYS_REDACT_FIELDS: &[(&str, PiiKind)] = &[
    ("social security number", PiiKind::Ssn),
    ("ssn", PiiKind::Ssn),
    ("home of record", PiiKind::Address),
    ("address", PiiKind::Address),
    ("date of birth", PiiKind::DateOfBirth),
    ("dob", PiiKind::DateOfBirth),
    ("place of birth", PiiKind::Address),
];

pub(crate) static COMPILED_GENERAL: LazyLock<Vec<(&'static PiiPatternDef, Regex)>> =
    LazyLock::new(|| {
        GENERAL_PII_PATTERNS
            .iter()
            .map(|def| {
                let re = Regex::new(def.regex)
                    .unwrap_or_else(|e| panic!("invalid PII pattern {}: {e}", def.id));
                (def, re)
            })
            .collect()
    });

pub(crate) static COMPILED_STRUCTURAL: LazyLock<Vec<(&'static StructuralPatternDef, Regex)>> =
    LazyLock::new(|| {
        STRUCTURAL_PATTERNS
            .iter()
            .map(|def| {
                let re = Regex::new(def.regex)
                    .unwrap_or_else(|e| panic!("invalid structural pattern {}: {e}", def.id));
                (def, re)
            })
            .collect()
    });
