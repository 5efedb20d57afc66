use crate::{
    document::ElementSpec,
    domain::{AnalysisResult, ColorTier, ToxicityLevel},
};

pub const INDICATOR_CLASS: &str = "content-analyzer-indicator";
pub const RESULT_CLASS: &str = "content-analyzer-result";
pub const STATUS_CLASS: &str = "content-analyzer-status";
pub const STATUS_TEXT_KEY: &str = "status-text";
pub const STATUS_TOGGLE_KEY: &str = "status-toggle";

#[derive(Debug, Clone, PartialEq)]
pub struct ResultBadge {
    pub icon: &'static str,
    pub label: String,
    pub score_text: String,
    pub bar_width: String,
    pub color: ColorTier,
    pub level: ToxicityLevel,
}

impl ResultBadge {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let percent = result.score * 100.0;
        Self {
            icon: result.label.icon(),
            label: result.label.as_str().to_uppercase(),
            score_text: format!("{percent:.1}%"),
            bar_width: format!("{}%", trim_percent(percent)),
            color: result.color_tier(),
            level: result.toxicity_level(),
        }
    }
}

// 85.00000000000001 -> 85, 42.5 -> 42.5
fn trim_percent(percent: f64) -> String {
    let rounded = (percent * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Indicator {
    Analyzing,
    Error,
    Result(ResultBadge),
}

impl Indicator {
    pub fn to_element(&self, candidate: &str) -> ElementSpec {
        match self {
            Indicator::Analyzing => ElementSpec::new("div")
                .class(format!("{INDICATOR_CLASS} analyzing"))
                .attr("data-candidate", candidate)
                .child(
                    ElementSpec::new("div")
                        .class("indicator-content")
                        .text("🔍 Analyzing..."),
                ),
            Indicator::Error => ElementSpec::new("div")
                .class(format!("{INDICATOR_CLASS} error"))
                .attr("data-candidate", candidate)
                .child(
                    ElementSpec::new("div")
                        .class("indicator-content")
                        .text("❌ Error"),
                ),
            Indicator::Result(badge) => ElementSpec::new("div")
                .class(RESULT_CLASS)
                .attr("data-candidate", candidate)
                .child(
                    ElementSpec::new("div")
                        .class(format!("result-content {}", badge.color.css_class()))
                        .attr("data-level", badge.level.as_str())
                        .child(ElementSpec::new("div").class("result-icon").text(badge.icon))
                        .child(
                            ElementSpec::new("div")
                                .class("result-text")
                                .child(
                                    ElementSpec::new("div")
                                        .class("result-label")
                                        .text(badge.label.clone()),
                                )
                                .child(
                                    ElementSpec::new("div")
                                        .class("result-score")
                                        .text(badge.score_text.clone()),
                                ),
                        )
                        .child(
                            ElementSpec::new("div").class("toxicity-bar").child(
                                ElementSpec::new("div")
                                    .class("toxicity-fill")
                                    .attr("style", format!("width: {}", badge.bar_width)),
                            ),
                        ),
                ),
        }
    }
}

pub fn status_text(enabled: bool) -> &'static str {
    if enabled {
        "Content Analyzer Active"
    } else {
        "Content Analyzer Paused"
    }
}

pub fn toggle_glyph(enabled: bool) -> &'static str {
    if enabled {
        "⏸️"
    } else {
        "▶️"
    }
}

pub fn status_bar(enabled: bool) -> ElementSpec {
    ElementSpec::new("div").class(STATUS_CLASS).child(
        ElementSpec::new("div")
            .class("status-content")
            .child(ElementSpec::new("span").class("status-icon").text("🔍"))
            .child(
                ElementSpec::new("span")
                    .class("status-text")
                    .key(STATUS_TEXT_KEY)
                    .text(status_text(enabled)),
            )
            .child(
                ElementSpec::new("button")
                    .class("status-toggle")
                    .key(STATUS_TOGGLE_KEY)
                    .text(toggle_glyph(enabled)),
            ),
    )
}
