pub mod candidate;
pub mod stats;
pub mod types;

pub use candidate::{AnnotationState, CandidateId};
pub use stats::{Settings, SettingsPatch, Stats, StatsPatch};
pub use types::{AnalysisResult, ColorTier, Label, ToxicityLevel};
