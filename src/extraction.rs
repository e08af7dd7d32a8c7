//! Deterministic DD214 field extraction from OCR line blocks.
//!
//! Input is the ordered LINE text sequence; output is a sparse map of
//! known field names to raw string values. Extraction never fails the
//! stage — whatever matches is returned, and an empty map is legal.
//!
//! Patterns per field are tried in declared order and the first capturing
//! match wins. All matching is case-insensitive and multi-line.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::ServiceDuration;

/// Closed vocabulary for the service branch field.
pub const SERVICE_BRANCHES: [&str; 6] = [
    "ARMY",
    "NAVY",
    "AIR FORCE",
    "MARINE CORPS",
    "COAST GUARD",
    "SPACE FORCE",
];

/// Ordered regex alternatives for one target field.
struct FieldPatternDef {
    field: &'static str,
    patterns: &'static [&'static str],
}

/// Fields extracted with a plain first-match-wins pattern list.
///
/// Names are stable; downstream consumers key on them.
static FIELD_PATTERNS: &[FieldPatternDef] = &[
    FieldPatternDef {
        field: "name",
        patterns: &[r"NAME.*?([A-Z]+,?\s+[A-Z]+(?:\s+[A-Z])?)"],
    },
    FieldPatternDef {
        field: "ssn",
        patterns: &[
            r"SOCIAL SECURITY NUMBER.*?(\d{3}-?\d{2}-?\d{4})",
            r"\bSSN\b[:\s]*(\d{3}-?\d{2}-?\d{4})",
        ],
    },
    FieldPatternDef {
        field: "grade_rate_rank",
        patterns: &[r"GRADE.*?RATE.*?RANK.*?([A-Z0-9-]+)"],
    },
    FieldPatternDef {
        field: "rank",
        patterns: &[
            r"(?m)^RANK[:\s]+([A-Z0-9-]+)",
            r"GRADE.*?RATE.*?RANK.*?([A-Z0-9-]+)",
        ],
    },
    FieldPatternDef {
        field: "pay_grade",
        patterns: &[r"PAY\s*GRADE.*?([EWO]-?\d{1,2})", r"\b([EWO]-\d{1,2})\b"],
    },
    FieldPatternDef {
        field: "home_of_record",
        patterns: &[
            r"HOME OF RECORD[^\n]*?:\s*([^\n]+)",
            r"HOME OF RECORD[^\n]*\n([^\n]+)",
        ],
    },
    FieldPatternDef {
        field: "last_duty",
        patterns: &[
            r"LAST DUTY (?:ASSIGNMENT|STATION)[^\n]*?:\s*([^\n]+)",
            r"LAST DUTY (?:ASSIGNMENT|STATION)[^\n]*\n([^\n]+)",
            r"STATION WHERE SEPARATED[^\n]*?:\s*([^\n]+)",
        ],
    },
    FieldPatternDef {
        field: "primary_specialty",
        patterns: &[r"(?:PRIMARY|MILITARY)?\s*(?:SPECIALTY|MOS|AFSC|RATE)[\s.:]*([A-Z0-9]+(?:\s+[A-Z0-9]+)?)"],
    },
    FieldPatternDef {
        field: "service_start",
        patterns: &[r"(?:ENTERED|ENTRY|DATE ENTERED)[^\n]*?(\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|\d{8})"],
    },
    FieldPatternDef {
        field: "service_end",
        patterns: &[
            r"(?:SEPARATED|SEPARATION DATE|RELEASED)[^\n]*?(\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|\d{8})",
        ],
    },
    FieldPatternDef {
        field: "foreign_service",
        patterns: &[r"FOREIGN SERVICE[^\n]*?(\d+\s*YEARS?\s*\d+\s*MONTHS?(?:\s*\d+\s*DAYS?)?|\d{4}\s+\d{2}\s+\d{2})"],
    },
    FieldPatternDef {
        field: "character_of_service",
        patterns: &[r"CHARACTER OF SERVICE.*?(HONORABLE|UNDER HONORABLE CONDITIONS|GENERAL|OTHER)"],
    },
    FieldPatternDef {
        field: "discharge_type",
        patterns: &[
            r"TYPE OF (?:SEPARATION|DISCHARGE).*?\n?([A-Z][A-Z ]{3,40})",
            r"CHARACTER OF SERVICE.*?(HONORABLE|GENERAL|OTHER)",
        ],
    },
    FieldPatternDef {
        field: "separation_code",
        patterns: &[r"SEPARATION CODE[^\nA-Z0-9]*([A-Z0-9]{2,5})"],
    },
    FieldPatternDef {
        field: "reentry_code",
        patterns: &[r"RE(?:ENTRY)?\s*CODE[^\nA-Z0-9]*([A-Z0-9]{1,4})"],
    },
];

static COMPILED_PATTERNS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    FIELD_PATTERNS
        .iter()
        .map(|def| {
            let compiled = def
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?im){p}"))
                        .unwrap_or_else(|e| panic!("invalid pattern for {}: {e}", def.field))
                })
                .collect();
            (def.field, compiled)
        })
        .collect()
});

/// Army-style MOS code (e.g. 11B, 68W).
static ARMY_MOS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{2}[A-Z]\b").unwrap());
/// Navy rate (e.g. IT, BM). Only applied when no Army-style code exists in
/// the same buffer — a stray letter pair must not shadow a real specialty.
static NAVY_RATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z]{2}\b").unwrap());
/// Air Force AFSC (e.g. 3D0X2).
static AFSC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d[A-Z]\d[A-Z]\d\b").unwrap());
/// Marine Corps four-digit MOS (e.g. 0311).
static USMC_MOS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}\b").unwrap());

static YEARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*year").unwrap());
static MONTHS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*month").unwrap());

const EDUCATION_KEYWORDS: [&str; 4] = ["SCHOOL", "COURSE", "TRAINING", "QUALIFICATION"];
const DECORATION_KEYWORDS: [&str; 7] = [
    "MEDAL",
    "RIBBON",
    "COMMENDATION",
    "ACHIEVEMENT",
    "STAR",
    "CROSS",
    "HEART",
];

/// Extract all known DD214 fields from the ordered LINE texts.
pub fn extract_fields(lines: &[String]) -> BTreeMap<String, String> {
    let buffer = lines.join("\n");
    let mut fields = BTreeMap::new();

    for (field, patterns) in COMPILED_PATTERNS.iter() {
        if let Some(value) = first_match(&buffer, patterns) {
            fields.insert((*field).to_string(), value);
        }
    }

    if let Some(branch) = extract_service_branch(&buffer) {
        fields.insert("branch".to_string(), branch.to_string());
        fields.insert("service_branch".to_string(), branch.to_string());
    }

    if let Some(mos) = extract_mos_code(&buffer, fields.get("primary_specialty")) {
        fields.insert("mos".to_string(), mos);
    }

    let education = keyword_lines(lines, &EDUCATION_KEYWORDS, 10, true);
    if !education.is_empty() {
        let joined = education.join("; ");
        fields.insert("education".to_string(), joined.clone());
        fields.insert("military_education".to_string(), joined);
    }

    let decorations = keyword_lines(lines, &DECORATION_KEYWORDS, 15, false);
    if !decorations.is_empty() {
        fields.insert("decorations".to_string(), decorations.join("; "));
    }

    // Empty matches are omitted rather than stored.
    fields.retain(|_, v| !v.is_empty());
    fields
}

fn first_match(buffer: &str, patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(buffer) {
            if let Some(group) = caps.get(1) {
                let value = group.as_str().trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Closed-vocabulary branch match; first branch found in document order of
/// the vocabulary wins.
pub fn extract_service_branch(buffer: &str) -> Option<&'static str> {
    let upper = buffer.to_uppercase();
    SERVICE_BRANCHES
        .iter()
        .find(|branch| upper.contains(*branch))
        .copied()
}

/// Extract a service-specific occupational code.
///
/// Tries the specialty field value first, then the whole buffer. Navy
/// rates are suppressed whenever an Army-style code appears anywhere in
/// the buffer (tie-break rule for two-letter shadows).
pub fn extract_mos_code(buffer: &str, specialty: Option<&String>) -> Option<String> {
    let army_present = ARMY_MOS.is_match(buffer);
    let candidates: [&str; 2] = [specialty.map(|s| s.as_str()).unwrap_or(""), buffer];

    for text in candidates {
        if text.is_empty() {
            continue;
        }
        if let Some(m) = ARMY_MOS.find(text) {
            return Some(m.as_str().to_string());
        }
        if let Some(m) = AFSC.find(text) {
            return Some(m.as_str().to_string());
        }
        if !army_present {
            if let Some(m) = NAVY_RATE.find(text) {
                return Some(m.as_str().to_string());
            }
        }
        if let Some(m) = USMC_MOS.find(text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// Parse a concatenated service-duration string ("6 years 4 months") into
/// totals. Absent groups contribute zero.
pub fn parse_service_duration(text: &str) -> ServiceDuration {
    let years = YEARS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let months = MONTHS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    ServiceDuration::new(years, months)
}

/// Collect lines containing any keyword, optionally bounded to plausible
/// entry lengths, up to `limit` entries.
fn keyword_lines(lines: &[String], keywords: &[&str], limit: usize, length_bounded: bool) -> Vec<String> {
    let mut hits = Vec::new();
    for line in lines {
        let upper = line.to_uppercase();
        if keywords.iter().any(|k| upper.contains(k)) {
            if length_bounded && !(10..100).contains(&line.len()) {
                continue;
            }
            hits.push(line.trim().to_string());
            if hits.len() == limit {
                break;
            }
        }
    }
    hits
}
