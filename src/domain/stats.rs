use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_analyzed: u64,
    pub toxic_count: u64,
}

/// Partial stats as carried by `updateStats`; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_analyzed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toxic_count: Option<u64>,
}

impl Stats {
    pub fn merge(&mut self, patch: StatsPatch) {
        if let Some(total) = patch.total_analyzed {
            self.total_analyzed = total;
        }
        if let Some(toxic) = patch.toxic_count {
            self.toxic_count = toxic;
        }
    }
}

impl From<Stats> for StatsPatch {
    fn from(stats: Stats) -> Self {
        Self {
            total_analyzed: Some(stats.total_analyzed),
            toxic_count: Some(stats.toxic_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub backend_url: String,
    pub is_enabled: bool,
}

impl Settings {
    pub fn with_backend(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            is_enabled: true,
        }
    }

    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(url) = patch.backend_url {
            self.backend_url = url;
        }
        if let Some(enabled) = patch.is_enabled {
            self.is_enabled = enabled;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_absent_fields() {
        let mut stats = Stats {
            total_analyzed: 3,
            toxic_count: 2,
        };
        let patch: StatsPatch = serde_json::from_str(r#"{"totalAnalyzed":5}"#).unwrap();
        stats.merge(patch);
        assert_eq!(
            stats,
            Stats {
                total_analyzed: 5,
                toxic_count: 2
            }
        );
    }
}
