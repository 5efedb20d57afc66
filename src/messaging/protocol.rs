use serde::{Deserialize, Serialize};

use crate::domain::{Settings, SettingsPatch, Stats, StatsPatch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    UpdateStats {
        stats: StatsPatch,
    },
    GetStats,
    IncrementAnalyzed,
    IncrementToxic,
    ResetStats,
    GetSettings,
    UpdateSettings {
        settings: SettingsPatch,
    },
    StatsUpdated {
        stats: Stats,
    },
    ToggleAnalysis {
        enabled: bool,
    },
    UpdateBackendUrl {
        url: String,
    },
    AddActivity {
        text: String,
        #[serde(rename = "type", default)]
        kind: ActivityKind,
    },
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Message::UpdateStats { .. } => "updateStats",
            Message::GetStats => "getStats",
            Message::IncrementAnalyzed => "incrementAnalyzed",
            Message::IncrementToxic => "incrementToxic",
            Message::ResetStats => "resetStats",
            Message::GetSettings => "getSettings",
            Message::UpdateSettings { .. } => "updateSettings",
            Message::StatsUpdated { .. } => "statsUpdated",
            Message::ToggleAnalysis { .. } => "toggleAnalysis",
            Message::UpdateBackendUrl { .. } => "updateBackendUrl",
            Message::AddActivity { .. } => "addActivity",
            Message::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    #[default]
    Info,
    Success,
    Error,
    Warning,
}

impl ActivityKind {
    pub fn icon(&self) -> &'static str {
        match self {
            ActivityKind::Info => "ℹ️",
            ActivityKind::Success => "✅",
            ActivityKind::Error => "❌",
            ActivityKind::Warning => "⚠️",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ack() -> Self {
        Self {
            success: Some(true),
            ..Default::default()
        }
    }

    pub fn stats(stats: Stats) -> Self {
        Self {
            stats: Some(stats),
            ..Default::default()
        }
    }

    pub fn ack_with_stats(stats: Stats) -> Self {
        Self {
            success: Some(true),
            stats: Some(stats),
            ..Default::default()
        }
    }

    pub fn settings(settings: Settings) -> Self {
        Self {
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn ack_with_settings(settings: Settings) -> Self {
        Self {
            success: Some(true),
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
