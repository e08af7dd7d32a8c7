//! Career-insight generation from the redacted document.
//!
//! Invokes the LLM with the comprehensive prompt, validates and repairs
//! the JSON response, attaches metadata, and guarantees the stable
//! section set. When the model is unreachable or returns garbage past one
//! salvage attempt, a statically constructed fallback artifact keeps the
//! stage successful.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::VariantOverride;
use crate::extraction;
use crate::llm::{compose, LlmClient, PromptInput, PromptVariant, RotationContext};
use crate::models::{
    LeadershipIndicators, VeteranProfile, INSIGHT_SECTIONS,
};

/// Analysis-method marker on the success path.
pub const ANALYSIS_METHOD_PRIMARY: &str = "enhanced_full_dd214_analysis";
/// Analysis-method marker on the degraded path.
pub const ANALYSIS_METHOD_FALLBACK: &str = "fallback";

/// Result of one insight-generation pass.
#[derive(Debug, Clone)]
pub struct GeneratedInsights {
    pub artifact: Value,
    pub fallback: bool,
    pub profile: VeteranProfile,
}

/// Insight generator bound to a transport and configuration.
pub struct InsightGenerator {
    client: LlmClient,
    model_id: String,
    overrides: BTreeMap<String, VariantOverride>,
    /// Whether to run the long-form extension variants after the primary
    /// artifact.
    run_extensions: bool,
}

impl InsightGenerator {
    pub fn new(
        client: LlmClient,
        model_id: impl Into<String>,
        overrides: BTreeMap<String, VariantOverride>,
    ) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            overrides,
            run_extensions: true,
        }
    }

    pub fn without_extensions(mut self) -> Self {
        self.run_extensions = false;
        self
    }

    /// Generate the insight artifact for a document.
    ///
    /// Never returns an error: every failure path lands on the fallback
    /// artifact so the stage completes and consumers always find valid
    /// JSON behind `insights_ref`.
    pub async fn generate(
        &self,
        document_id: &str,
        redacted_text: &str,
        extracted_fields: &BTreeMap<String, String>,
        seed: u64,
    ) -> GeneratedInsights {
        let profile = build_profile(extracted_fields);
        let rotation = RotationContext::from_seed(seed, Utc::now());

        let bundle = compose(
            PromptInput {
                redacted_text,
                profile: Some(&profile),
                variant: PromptVariant::Dd214Comprehensive,
                rotation: rotation.clone(),
            },
            &self.model_id,
            &self.overrides,
        );

        let mut artifact = match self.client.generate(&bundle).await {
            Ok(raw) => match parse_llm_json(&raw) {
                Some(Value::Object(map)) => Value::Object(map),
                _ => {
                    warn!(document_id, "LLM response unparseable after salvage, using fallback");
                    return self.finish_fallback(redacted_text, profile);
                }
            },
            Err(e) => {
                warn!(document_id, error = %e, "LLM call failed, using fallback");
                return self.finish_fallback(redacted_text, profile);
            }
        };

        attach_metadata(&mut artifact, &self.model_id, ANALYSIS_METHOD_PRIMARY);
        ensure_sections(&mut artifact);

        if self.run_extensions {
            self.attach_extension(
                &mut artifact,
                PromptVariant::LegacyReport,
                "legacy_report",
                "legacy_intelligence_report",
                redacted_text,
                &profile,
                &rotation,
            )
            .await;
            self.attach_extension(
                &mut artifact,
                PromptVariant::MetaRecommendations,
                "meta_ai_prompts",
                "meta_ai_recommendations",
                redacted_text,
                &profile,
                &rotation,
            )
            .await;
        }

        info!(document_id, "insight artifact generated");
        GeneratedInsights {
            artifact,
            fallback: false,
            profile,
        }
    }

    /// Run one extension variant and attach its payload under `key`.
    /// Extension failures are recorded, never fatal.
    #[allow(clippy::too_many_arguments)]
    async fn attach_extension(
        &self,
        artifact: &mut Value,
        variant: PromptVariant,
        key: &str,
        inner_key: &str,
        redacted_text: &str,
        profile: &VeteranProfile,
        rotation: &RotationContext,
    ) {
        let bundle = compose(
            PromptInput {
                redacted_text,
                profile: Some(profile),
                variant,
                rotation: rotation.clone(),
            },
            &self.model_id,
            &self.overrides,
        );
        match self.client.generate(&bundle).await {
            Ok(raw) => {
                if let Some(value) = parse_llm_json(&raw) {
                    // Unwrap the namespacing key the prompt asks for, if
                    // the model included it.
                    let payload = value
                        .get(inner_key)
                        .cloned()
                        .unwrap_or(value);
                    artifact[key] = payload;
                } else {
                    warn!(variant = variant.as_str(), "extension response unparseable, skipping");
                }
            }
            Err(e) => {
                warn!(variant = variant.as_str(), error = %e, "extension generation failed, skipping");
            }
        }
    }

    fn finish_fallback(&self, redacted_text: &str, profile: VeteranProfile) -> GeneratedInsights {
        let mut artifact = fallback_artifact(redacted_text, &profile);
        attach_metadata(&mut artifact, &self.model_id, ANALYSIS_METHOD_FALLBACK);
        ensure_sections(&mut artifact);
        GeneratedInsights {
            artifact,
            fallback: true,
            profile,
        }
    }
}

/// Strip fence markers and parse the response as JSON, with a single
/// salvage pass for prose-wrapped objects.
pub fn parse_llm_json(raw: &str) -> Option<Value> {
    let stripped = strip_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(stripped.trim()) {
        return Some(value);
    }
    // One salvage attempt: the outermost braces and nothing more.
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

fn strip_fences(raw: &str) -> &str {
    if let Some(rest) = raw.split("```json").nth(1) {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some(rest) = raw.split("```").nth(1) {
        return rest;
    }
    raw
}

fn attach_metadata(artifact: &mut Value, model_id: &str, method: &str) {
    artifact["generated_at"] = json!(Utc::now().to_rfc3339());
    artifact["model_version"] = json!(model_id);
    artifact["analysis_method"] = json!(method);
    artifact["analysis_depth"] = json!("comprehensive");
}

/// Insert empty objects for any guaranteed section the model omitted.
fn ensure_sections(artifact: &mut Value) {
    for section in INSIGHT_SECTIONS {
        if artifact.get(section).is_none() {
            artifact[section] = json!({});
        }
    }
}

/// Statically constructed artifact for the degraded path.
///
/// The profile scan is a deliberately simple literal check over the
/// redacted text so this path has no dependencies that can fail.
pub fn fallback_artifact(redacted_text: &str, profile: &VeteranProfile) -> Value {
    let mut extracted = json!({
        "branch": if redacted_text.contains("ARMY") { "ARMY" } else { "Unknown" },
        "rank": "Unknown",
        "mos": "Unknown",
        "years_of_service": profile.service_duration.years.to_string(),
    });
    if redacted_text.contains("SSG") {
        extracted["rank"] = json!("SSG");
    }
    if redacted_text.contains("18D") {
        extracted["mos"] = json!("18D - Special Forces Medical Sergeant");
    }
    if redacted_text.contains("BRONZE STAR") {
        extracted["decorations"] = json!(["Bronze Star Medal"]);
    }
    if !profile.branch.is_empty() && extracted["branch"] == json!("Unknown") {
        extracted["branch"] = json!(profile.branch.to_uppercase());
    }

    json!({
        "extracted_profile": extracted,
        "career_recommendations": [],
        "transferable_skills": ["Leadership", "Teamwork", "Problem-solving"],
        "action_steps": [
            "Update resume with military experience translated to civilian terms",
            "Network with veterans in target industries",
            "Apply to veteran-friendly employers",
        ],
        "education_priorities": ["Relevant certification", "Degree completion"],
        "networking_strategy": {
            "industries": ["Security", "Healthcare"],
            "associations": ["Veterans groups"],
            "companies": ["Government contractors"],
        },
    })
}

/// Build the veteran profile from extracted DD214 fields.
pub fn build_profile(fields: &BTreeMap<String, String>) -> VeteranProfile {
    let rank = fields
        .get("rank")
        .or_else(|| fields.get("grade_rate_rank"))
        .cloned()
        .unwrap_or_default();

    let specialty_text = fields
        .get("mos")
        .or_else(|| fields.get("primary_specialty"))
        .cloned()
        .unwrap_or_default();
    let mos = extraction::extract_mos_code(&specialty_text, None)
        .unwrap_or_else(|| specialty_text.clone());

    let duration_text = fields
        .get("total_service")
        .or_else(|| fields.get("foreign_service"))
        .cloned()
        .unwrap_or_default();
    let service_duration = extraction::parse_service_duration(&duration_text);
    let experience_level = service_duration.experience_level().as_str().to_string();

    let leadership = leadership_indicators(&rank, fields.get("pay_grade"));
    let education_text = fields
        .get("military_education")
        .or_else(|| fields.get("education"))
        .cloned()
        .unwrap_or_default();

    VeteranProfile {
        branch: normalize_branch(fields.get("branch").or_else(|| fields.get("service_branch"))),
        rank,
        mos,
        experience_level,
        service_duration,
        decorations: keyword_titles(
            fields.get("decorations").map(|s| s.as_str()).unwrap_or(""),
            &[
                "bronze star",
                "silver star",
                "purple heart",
                "meritorious service",
                "commendation",
                "achievement",
                "good conduct",
                "national defense",
                "combat action",
            ],
        ),
        military_education: keyword_titles(
            &education_text,
            &[
                "basic training",
                "advanced individual training",
                "nco academy",
                "leadership",
                "airborne",
                "ranger",
                "special forces",
                "officer candidate",
                "technical school",
            ],
        ),
        character_of_service: fields
            .get("character_of_service")
            .or_else(|| fields.get("discharge_type"))
            .cloned()
            .unwrap_or_default(),
        technical_skills: technical_skills(&specialty_text, &education_text),
        security_clearance: infer_clearance(&specialty_text.to_lowercase()),
        leadership,
    }
}

fn normalize_branch(branch: Option<&String>) -> String {
    let Some(branch) = branch else {
        return "unknown".to_string();
    };
    let lower = branch.to_lowercase();
    if lower.contains("army") {
        "army"
    } else if lower.contains("navy") {
        "navy"
    } else if lower.contains("marine") || lower.contains("usmc") {
        "marines"
    } else if lower.contains("air force") || lower.contains("usaf") {
        "air_force"
    } else if lower.contains("coast guard") || lower.contains("uscg") {
        "coast_guard"
    } else if lower.contains("space force") || lower.contains("ussf") {
        "space_force"
    } else {
        "unknown"
    }
    .to_string()
}

fn leadership_indicators(rank: &str, pay_grade_field: Option<&String>) -> LeadershipIndicators {
    let upper = rank.to_uppercase();
    const NCO_RANKS: [&str; 10] = [
        "E-4", "E-5", "E-6", "E-7", "E-8", "E-9", "SGT", "CPL", "SSG", "MSG",
    ];
    const OFFICER_RANKS: [&str; 8] = ["O-", "W-", "LT", "CPT", "MAJ", "COL", "GEN", "ADM"];

    static PAY_GRADE_RE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"[EWO]-\d+").unwrap());
    let pay_grade = pay_grade_field
        .cloned()
        .or_else(|| PAY_GRADE_RE.find(&upper).map(|m| m.as_str().to_string()))
        .unwrap_or_default();

    let is_nco = NCO_RANKS.iter().any(|r| upper.contains(r))
        || matches!(pay_grade.as_str(), "E-4" | "E-5" | "E-6" | "E-7" | "E-8" | "E-9");
    let is_officer = OFFICER_RANKS.iter().any(|r| upper.contains(r));

    let leadership_level = if is_officer {
        "executive"
    } else if matches!(pay_grade.as_str(), "E-7" | "E-8" | "E-9") {
        "senior"
    } else if is_nco {
        "mid-level"
    } else {
        "individual contributor"
    };

    LeadershipIndicators {
        is_nco,
        is_officer,
        pay_grade,
        leadership_level: leadership_level.to_string(),
    }
}

fn technical_skills(mos: &str, education: &str) -> Vec<String> {
    const BUCKETS: [(&str, [&str; 4]); 8] = [
        ("communications", ["signal", "comm", "radio", "satellite"]),
        ("medical", ["medic", "corpsman", "medical", "health"]),
        ("logistics", ["supply", "logistics", "transportation", "quartermaster"]),
        ("intelligence", ["intel", "analyst", "cryptologic", "linguist"]),
        ("maintenance", ["mechanic", "maintenance", "repair", "aviation"]),
        ("information technology", ["cyber", "network", "computer", "systems"]),
        ("security", ["military police", "security forces", "master at arms", "guard"]),
        ("engineering", ["engineer", "construction", "utilities", "survey"]),
    ];

    let combined = format!("{} {}", mos.to_lowercase(), education.to_lowercase());
    BUCKETS
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|p| combined.contains(p)))
        .map(|(skill, _)| skill.to_string())
        .collect()
}

fn infer_clearance(mos_lower: &str) -> String {
    const TS_INDICATORS: [&str; 5] = ["intel", "crypto", "signal", "cyber", "special forces"];
    const SECRET_INDICATORS: [&str; 3] = ["military police", "communications", "aviation"];

    if TS_INDICATORS.iter().any(|i| mos_lower.contains(i)) {
        "Top Secret (likely)".to_string()
    } else if SECRET_INDICATORS.iter().any(|i| mos_lower.contains(i)) {
        "Secret (likely)".to_string()
    } else {
        "Confidential (minimum)".to_string()
    }
}

fn keyword_titles(text: &str, keywords: &[&str]) -> Vec<String> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| lower.contains(*k))
        .map(|k| title_case(k))
        .collect()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
