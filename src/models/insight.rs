//! Veteran profile and insight artifact models.

use serde::{Deserialize, Serialize};

/// Experience tier derived from total months of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Entry,
    Junior,
    Mid,
    Senior,
    Expert,
}

impl ExperienceLevel {
    /// Tier thresholds in months: [0,24) entry, [24,48) junior,
    /// [48,96) mid, [96,144) senior, [144,∞) expert.
    pub fn from_months(months: u32) -> Self {
        match months {
            0..=23 => Self::Entry,
            24..=47 => Self::Junior,
            48..=95 => Self::Mid,
            96..=143 => Self::Senior,
            _ => Self::Expert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Junior => "junior",
            Self::Mid => "mid-level",
            Self::Senior => "senior",
            Self::Expert => "expert",
        }
    }
}

/// Parsed service duration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDuration {
    pub years: u32,
    pub months: u32,
    pub total_months: u32,
}

impl ServiceDuration {
    pub fn new(years: u32, months: u32) -> Self {
        Self {
            years,
            months,
            total_months: years * 12 + months,
        }
    }

    pub fn experience_level(&self) -> ExperienceLevel {
        ExperienceLevel::from_months(self.total_months)
    }
}

/// Leadership indicators inferred from rank and pay grade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadershipIndicators {
    pub is_nco: bool,
    pub is_officer: bool,
    pub pay_grade: String,
    pub leadership_level: String,
}

/// Best-effort veteran profile assembled from extracted fields.
///
/// Feeds prompt composition and the fallback insight artifact. Every
/// field degrades to a neutral value when the source data is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeteranProfile {
    pub branch: String,
    pub rank: String,
    pub mos: String,
    pub service_duration: ServiceDuration,
    pub experience_level: String,
    pub decorations: Vec<String>,
    pub military_education: Vec<String>,
    pub character_of_service: String,
    pub leadership: LeadershipIndicators,
    pub technical_skills: Vec<String>,
    pub security_clearance: String,
}

/// Section names the primary insight artifact always carries.
///
/// Consumers tolerate absent sections, but the generator fills missing
/// ones with empty objects so the contract holds on the write side.
pub const INSIGHT_SECTIONS: [&str; 9] = [
    "executive_intelligence_summary",
    "extracted_profile",
    "market_intelligence",
    "career_recommendations",
    "hidden_strengths_analysis",
    "psychological_preparation",
    "compensation_intelligence",
    "action_oriented_deliverables",
    "transition_timeline",
];
