//! Data models for vetintel.

mod insight;
mod record;

pub use insight::{
    ExperienceLevel, LeadershipIndicators, ServiceDuration, VeteranProfile, INSIGHT_SECTIONS,
};
pub use record::{
    ArtifactKind, BlobRef, DocumentRecord, DocumentStatus, FindingSource, PiiFinding, PiiKind,
    SourceRef, StepInfo, StepName, StepState,
};
