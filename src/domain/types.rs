use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Label {
    Toxic,
    Safe,
    Neutral,
    Other(String),
}

impl Label {
    pub fn as_str(&self) -> &str {
        match self {
            Label::Toxic => "toxic",
            Label::Safe => "safe",
            Label::Neutral => "neutral",
            Label::Other(raw) => raw.as_str(),
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Label::Toxic => "⚠️",
            Label::Safe => "✅",
            Label::Neutral => "➖",
            Label::Other(_) => "❓",
        }
    }

    pub fn is_toxic(&self) -> bool {
        matches!(self, Label::Toxic)
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        match value.as_str() {
            "toxic" => Label::Toxic,
            "safe" => Label::Safe,
            "neutral" => Label::Neutral,
            _ => Label::Other(value),
        }
    }
}

impl From<Label> for String {
    fn from(value: Label) -> Self {
        match value {
            Label::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict for one candidate. `score` is clamped to `[0, 1]`, also when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScoredLabel")]
pub struct AnalysisResult {
    pub label: Label,
    pub score: f64,
}

#[derive(Deserialize)]
struct ScoredLabel {
    label: Label,
    score: f64,
}

impl From<ScoredLabel> for AnalysisResult {
    fn from(raw: ScoredLabel) -> Self {
        AnalysisResult::new(raw.label, raw.score)
    }
}

impl AnalysisResult {
    pub fn new(label: Label, score: f64) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        Self { label, score }
    }

    pub fn toxicity_level(&self) -> ToxicityLevel {
        ToxicityLevel::from_score(self.score)
    }

    pub fn color_tier(&self) -> ColorTier {
        ColorTier::from_result(&self.label, self.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToxicityLevel {
    Low,
    Medium,
    High,
}

impl ToxicityLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            ToxicityLevel::Low
        } else if score < 0.7 {
            ToxicityLevel::Medium
        } else {
            ToxicityLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToxicityLevel::Low => "Low",
            ToxicityLevel::Medium => "Medium",
            ToxicityLevel::High => "High",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTier {
    Safe,
    LowToxic,
    MediumToxic,
    HighToxic,
}

impl ColorTier {
    pub fn from_result(label: &Label, score: f64) -> Self {
        if !label.is_toxic() {
            ColorTier::Safe
        } else if score > 0.7 {
            ColorTier::HighToxic
        } else if score > 0.4 {
            ColorTier::MediumToxic
        } else {
            ColorTier::LowToxic
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ColorTier::Safe => "safe",
            ColorTier::LowToxic => "low-toxic",
            ColorTier::MediumToxic => "medium-toxic",
            ColorTier::HighToxic => "high-toxic",
        }
    }
}
