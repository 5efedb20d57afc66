use serde::Deserialize;
use thiserror::Error;

use crate::document::ElementSpec;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Open {
        page: String,
        url: String,
    },
    Navigate {
        page: String,
        url: String,
    },
    Activate {
        page: String,
    },
    Close {
        page: String,
    },
    Append {
        page: String,
        #[serde(default)]
        parent: Option<String>,
        node: ElementSpec,
    },
    Move {
        page: String,
        key: String,
        #[serde(default)]
        parent: Option<String>,
    },
    Remove {
        page: String,
        key: String,
    },
    Panel {
        #[serde(flatten)]
        op: PanelOp,
    },
    Wait {
        ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PanelOp {
    Open,
    Close,
    Focus,
    Toggle { enabled: bool },
    SetBackendUrl { url: String },
    ResetStats,
}

#[derive(Debug, Error)]
#[error("line {line}: {source}")]
pub struct FeedError {
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

pub fn parse_line(line_no: usize, raw: &str) -> Result<Option<SessionEvent>, FeedError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| FeedError {
            line: line_no,
            source,
        })
}
