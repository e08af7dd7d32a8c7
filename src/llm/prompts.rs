//! Prompt composition for career-intelligence generation.
//!
//! A pure function from redacted text plus optional profile context to a
//! composed prompt bundle. No I/O happens here. Variability for
//! sampling-enabled variants is confined to `RotationContext`, which the
//! caller seeds — everything else in the pipeline stays deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VariantOverride;
use crate::models::{VeteranProfile, INSIGHT_SECTIONS};

/// Character ceiling for redacted text interpolated into a prompt.
pub const MAX_PROMPT_TEXT_CHARS: usize = 12_000;

/// Inference parameters pinned per variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Registered prompt variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptVariant {
    Dd214Comprehensive,
    LegacyReport,
    MetaRecommendations,
    InterviewPrep,
    SalaryNegotiation,
}

impl PromptVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dd214Comprehensive => "dd214_comprehensive",
            Self::LegacyReport => "legacy_report",
            Self::MetaRecommendations => "meta_recommendations",
            Self::InterviewPrep => "interview_prep",
            Self::SalaryNegotiation => "salary_negotiation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dd214_comprehensive" => Some(Self::Dd214Comprehensive),
            "legacy_report" => Some(Self::LegacyReport),
            "meta_recommendations" => Some(Self::MetaRecommendations),
            "interview_prep" => Some(Self::InterviewPrep),
            "salary_negotiation" => Some(Self::SalaryNegotiation),
            _ => None,
        }
    }

    /// Pinned inference parameters for the variant.
    pub fn params(&self) -> InferenceParams {
        match self {
            Self::Dd214Comprehensive => InferenceParams {
                max_tokens: 8000,
                temperature: 0.8,
                top_p: 0.95,
            },
            Self::LegacyReport => InferenceParams {
                max_tokens: 5000,
                temperature: 0.9,
                top_p: 0.95,
            },
            Self::MetaRecommendations => InferenceParams {
                max_tokens: 3000,
                temperature: 0.8,
                top_p: 0.9,
            },
            Self::InterviewPrep => InferenceParams {
                max_tokens: 3000,
                temperature: 0.7,
                top_p: 0.9,
            },
            Self::SalaryNegotiation => InferenceParams {
                max_tokens: 3000,
                temperature: 0.7,
                top_p: 0.9,
            },
        }
    }

    /// Whether sampling is on and rotating context tokens may be woven in.
    pub fn sampling_enabled(&self) -> bool {
        self.params().temperature >= 0.8
    }
}

/// Rotating context woven into sampling-enabled prompts.
///
/// Selection is a pure function of the seed so tests can pin it.
#[derive(Debug, Clone)]
pub struct RotationContext {
    pub date_line: String,
    pub quarter: String,
    pub perspective: &'static str,
    pub market_condition: &'static str,
    pub career_path: &'static str,
}

const PERSPECTIVES: [&str; 5] = [
    "a former Fortune 500 executive who places veterans in leadership roles",
    "a defense-sector recruiter who has screened thousands of cleared candidates",
    "a compensation specialist who negotiates veteran hiring packages",
    "a career risk analyst who helps veterans avoid transition pitfalls",
    "a veteran founder who built companies with military co-founders",
];

const MARKET_CONDITIONS: [&str; 6] = [
    "Defense technology hiring is at a cyclical high this quarter.",
    "Large technology employers have slowed hiring, shifting demand to the mid-market.",
    "Cleared-professional demand continues to outpace supply.",
    "Cybersecurity openings are up sharply following recent breaches.",
    "Average time-to-hire for cleared roles has dropped below thirty days.",
    "Employers are waiving degree requirements for candidates with clearances.",
];

const CAREER_PATHS: [&str; 5] = [
    "an established corporate trajectory",
    "a high-growth startup path",
    "an entrepreneurial path",
    "a hybrid corporate-plus-consulting track",
    "independent high-rate contracting",
];

impl RotationContext {
    /// Derive rotation tokens from a seed and timestamp.
    pub fn from_seed(seed: u64, now: DateTime<Utc>) -> Self {
        Self {
            date_line: now.format("%Y-%m-%d").to_string(),
            quarter: format!("Q{} {}", (now.month0() / 3) + 1, now.year()),
            perspective: PERSPECTIVES[(seed % PERSPECTIVES.len() as u64) as usize],
            market_condition: MARKET_CONDITIONS[((seed / 7) % MARKET_CONDITIONS.len() as u64) as usize],
            career_path: CAREER_PATHS[((seed / 41) % CAREER_PATHS.len() as u64) as usize],
        }
    }
}

/// A composed prompt ready for the transport.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    pub variant: PromptVariant,
    pub model_id: String,
    pub system_text: String,
    pub params: InferenceParams,
    /// True when the redacted text was cut at the input ceiling.
    pub truncated: bool,
}

/// Inputs to composition.
pub struct PromptInput<'a> {
    pub redacted_text: &'a str,
    pub profile: Option<&'a VeteranProfile>,
    pub variant: PromptVariant,
    pub rotation: RotationContext,
}

/// Compose a prompt bundle.
///
/// `model_id` and `overrides` come from configuration; per-variant
/// overrides win over pinned parameters.
pub fn compose(
    input: PromptInput<'_>,
    model_id: &str,
    overrides: &BTreeMap<String, VariantOverride>,
) -> PromptBundle {
    let (text, truncated) = bounded_text(input.redacted_text);
    let mut params = input.variant.params();
    if let Some(over) = overrides.get(input.variant.as_str()) {
        if let Some(v) = over.max_tokens {
            params.max_tokens = v;
        }
        if let Some(v) = over.temperature {
            params.temperature = v;
        }
        if let Some(v) = over.top_p {
            params.top_p = v;
        }
    }

    let system_text = match input.variant {
        PromptVariant::Dd214Comprehensive => comprehensive_prompt(text, truncated, &input.rotation),
        PromptVariant::LegacyReport => legacy_report_prompt(text, input.profile, &input.rotation),
        PromptVariant::MetaRecommendations => meta_recommendations_prompt(input.profile),
        PromptVariant::InterviewPrep => interview_prep_prompt(input.profile),
        PromptVariant::SalaryNegotiation => salary_negotiation_prompt(input.profile),
    };

    PromptBundle {
        variant: input.variant,
        model_id: model_id.to_string(),
        system_text,
        params,
        truncated,
    }
}

/// Cut the redacted text at the ceiling on a UTF-8 boundary.
fn bounded_text(text: &str) -> (&str, bool) {
    if text.len() <= MAX_PROMPT_TEXT_CHARS {
        return (text, false);
    }
    let mut end = MAX_PROMPT_TEXT_CHARS;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

fn profile_block(profile: Option<&VeteranProfile>) -> String {
    let Some(p) = profile else {
        return "No structured profile is available; infer what you can.".to_string();
    };
    format!(
        "VETERAN PROFILE:\n\
         - Branch: {}\n\
         - Rank: {}\n\
         - MOS/Specialty: {}\n\
         - Service Duration: {} years, {} months ({} experience)\n\
         - Leadership Level: {}\n\
         - Decorations: {}\n\
         - Military Education: {}\n\
         - Technical Skills: {}\n\
         - Likely Clearance: {}",
        none_if_empty(&p.branch),
        none_if_empty(&p.rank),
        none_if_empty(&p.mos),
        p.service_duration.years,
        p.service_duration.months,
        none_if_empty(&p.experience_level),
        none_if_empty(&p.leadership.leadership_level),
        list_or_none(&p.decorations),
        list_or_none(&p.military_education),
        list_or_none(&p.technical_skills),
        none_if_empty(&p.security_clearance),
    )
}

fn none_if_empty(s: &str) -> &str {
    if s.is_empty() {
        "Unknown"
    } else {
        s
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None listed".to_string()
    } else {
        items.join(", ")
    }
}

fn comprehensive_prompt(text: &str, truncated: bool, rotation: &RotationContext) -> String {
    let sections = INSIGHT_SECTIONS.join(", ");
    let truncation_note = if truncated {
        "\nNOTE: The document below was truncated for length; analyze what is present."
    } else {
        ""
    };
    format!(
        "You are an expert military career advisor analyzing a veteran's redacted DD214 \
         separation document. Write as {perspective}.\n\
         \n\
         Analysis date: {date} ({quarter}). Market context: {market}\n\
         When weighing options, give extra attention to {path}.\n\
         \n\
         TASK 1: Extract key information from the redacted DD214: branch of service, final \
         rank and pay grade, primary MOS/Rate/AFSC with specialty title, years of service, \
         combat deployments, decorations and medals, special qualifications, and military \
         education completed.\n\
         \n\
         TASK 2: Provide career recommendations appropriate for this veteran's experience \
         level and qualifications. Be specific: name employers, roles, and dollar figures, \
         not generic categories.\n\
         \n\
         TASK 3: Generate resume-ready content that translates military experience into \
         civilian terms, quantified wherever the document supports it.\n\
         {truncation_note}\n\
         \n\
         REDACTED DD214 DOCUMENT:\n\
         {text}\n\
         \n\
         RESPONSE FORMAT: respond with a single JSON object and nothing else. The object \
         must contain exactly these top-level sections: {sections}. \
         `extracted_profile` carries branch, rank, pay_grade, mos, years_of_service, \
         combat_experience, deployments, decorations, special_qualifications, \
         military_education, and clearance_level. `career_recommendations` is a list of \
         roles, each with title, why_perfect_fit, company_targets, salary_intelligence, \
         and a 90-day strategy. Use empty objects for sections the document cannot \
         support. Do not wrap the JSON in markdown fences.",
        perspective = rotation.perspective,
        date = rotation.date_line,
        quarter = rotation.quarter,
        market = rotation.market_condition,
        path = rotation.career_path,
        truncation_note = truncation_note,
        text = text,
        sections = sections,
    )
}

fn legacy_report_prompt(
    text: &str,
    profile: Option<&VeteranProfile>,
    rotation: &RotationContext,
) -> String {
    format!(
        "You are writing a long-form Legacy Intelligence Report for a transitioning \
         veteran — a narrative document their family could read with pride and a hiring \
         executive could read with respect.\n\
         \n\
         {profile}\n\
         \n\
         Market context: {market}\n\
         \n\
         REDACTED DD214 DOCUMENT:\n\
         {text}\n\
         \n\
         Write roughly 1,500 words across: the arc of their service, what their record \
         demonstrates about character and capability, how their qualifications translate \
         into civilian value, and the legacy they carry forward.\n\
         \n\
         RESPONSE FORMAT: a single JSON object with one top-level key \
         `legacy_intelligence_report` containing `narrative` (the full text), \
         `headline` (one sentence), and `key_themes` (a list). No markdown fences.",
        profile = profile_block(profile),
        market = rotation.market_condition,
        text = text,
    )
}

fn meta_recommendations_prompt(profile: Option<&VeteranProfile>) -> String {
    format!(
        "You design personalized AI prompts for a transitioning veteran to use in their \
         own career research.\n\
         \n\
         {profile}\n\
         \n\
         Produce ready-to-paste prompts the veteran can run themselves: one for deep \
         research on a target employer, one for tailoring a resume to a posting, one for \
         mock-interview practice, and one for salary research in their region.\n\
         \n\
         RESPONSE FORMAT: a single JSON object with one top-level key \
         `meta_ai_recommendations` mapping prompt names to prompt text. No markdown \
         fences.",
        profile = profile_block(profile),
    )
}

fn interview_prep_prompt(profile: Option<&VeteranProfile>) -> String {
    format!(
        "You are coaching a veteran for civilian job interviews.\n\
         \n\
         {profile}\n\
         \n\
         Produce interview preparation material: likely questions for their target roles, \
         STAR-format answers grounded in military experience, phrases that translate \
         service jargon for a civilian panel, and questions the candidate should ask.\n\
         \n\
         RESPONSE FORMAT: a single JSON object with keys `likely_questions`, \
         `star_stories`, `translation_guide`, and `questions_to_ask`. No markdown fences.",
        profile = profile_block(profile),
    )
}

fn salary_negotiation_prompt(profile: Option<&VeteranProfile>) -> String {
    format!(
        "You are a compensation strategist preparing a veteran to negotiate offers.\n\
         \n\
         {profile}\n\
         \n\
         Produce a negotiation brief: a defensible market range for their experience \
         tier, the premium a clearance or specialty commands, negotiation levers unique \
         to their record, and scripts for countering a low offer.\n\
         \n\
         RESPONSE FORMAT: a single JSON object with keys `market_range`, `premiums`, \
         `leverage`, and `counter_scripts`. No markdown fences.",
        profile = profile_block(profile),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> RotationContext {
        RotationContext::from_seed(0, Utc::now())
    }

    #[test]
    fn test_variant_params_pinned() {
        let p = PromptVariant::Dd214Comprehensive.params();
        assert_eq!((p.max_tokens, p.temperature, p.top_p), (8000, 0.8, 0.95));
        let p = PromptVariant::LegacyReport.params();
        assert_eq!((p.max_tokens, p.temperature, p.top_p), (5000, 0.9, 0.95));
    }

    #[test]
    fn test_compose_is_deterministic_for_fixed_rotation() {
        let input = || PromptInput {
            redacted_text: "BRANCH ARMY [REDACTED-SSN]",
            profile: None,
            variant: PromptVariant::Dd214Comprehensive,
            rotation: RotationContext::from_seed(
                42,
                DateTime::parse_from_rfc3339("2025-06-17T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
        };
        let a = compose(input(), "model-x", &BTreeMap::new());
        let b = compose(input(), "model-x", &BTreeMap::new());
        assert_eq!(a.system_text, b.system_text);
        assert_eq!(a.params, b.params);
    }

    #[test]
    fn test_rotation_varies_with_seed() {
        let now = Utc::now();
        let texts: std::collections::HashSet<_> = (0..5u64)
            .map(|seed| RotationContext::from_seed(seed, now).perspective)
            .collect();
        assert!(texts.len() > 1);
    }

    #[test]
    fn test_prompt_names_all_sections() {
        let bundle = compose(
            PromptInput {
                redacted_text: "text",
                profile: None,
                variant: PromptVariant::Dd214Comprehensive,
                rotation: rotation(),
            },
            "model-x",
            &BTreeMap::new(),
        );
        for section in INSIGHT_SECTIONS {
            assert!(bundle.system_text.contains(section), "missing {section}");
        }
    }

    #[test]
    fn test_truncation_marked() {
        let long = "X".repeat(MAX_PROMPT_TEXT_CHARS + 100);
        let bundle = compose(
            PromptInput {
                redacted_text: &long,
                profile: None,
                variant: PromptVariant::Dd214Comprehensive,
                rotation: rotation(),
            },
            "model-x",
            &BTreeMap::new(),
        );
        assert!(bundle.truncated);
        assert!(bundle.system_text.contains("truncated for length"));
    }

    #[test]
    fn test_config_override_wins() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "legacy_report".to_string(),
            VariantOverride {
                max_tokens: Some(6000),
                temperature: None,
                top_p: None,
            },
        );
        let bundle = compose(
            PromptInput {
                redacted_text: "text",
                profile: None,
                variant: PromptVariant::LegacyReport,
                rotation: rotation(),
            },
            "model-x",
            &overrides,
        );
        assert_eq!(bundle.params.max_tokens, 6000);
        assert_eq!(bundle.params.temperature, 0.9);
    }

    #[test]
    fn test_variant_round_trip_names() {
        for v in [
            PromptVariant::Dd214Comprehensive,
            PromptVariant::LegacyReport,
            PromptVariant::MetaRecommendations,
            PromptVariant::InterviewPrep,
            PromptVariant::SalaryNegotiation,
        ] {
            assert_eq!(PromptVariant::from_str(v.as_str()), Some(v));
        }
    }
}
