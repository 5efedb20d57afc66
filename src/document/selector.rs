use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::tree::NodeData;

static SELECTOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\[(?P<attr>[A-Za-z_][-A-Za-z0-9_:.]*)(?:="(?P<value>[^"]*)")?\]|\.(?P<class>[-A-Za-z0-9_]+)|(?P<tag>[A-Za-z][A-Za-z0-9-]*))$"#,
    )
    .expect("valid selector regex")
});

pub const TWEET_SELECTORS: [&str; 4] = [
    r#"[data-testid="tweet"]"#,
    r#"[data-testid="tweetText"]"#,
    ".tweet-text",
    "[lang]",
];
pub const TWEET_CONTAINER: &str = r#"[data-testid="tweet"]"#;
pub const TWEET_TEXT: &str = r#"[data-testid="tweetText"]"#;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported selector: {0}")]
pub struct SelectorError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(String),
    Class(String),
    HasAttr(String),
    AttrEquals { name: String, value: String },
}

impl Selector {
    pub(crate) fn matches(&self, node: &NodeData) -> bool {
        match self {
            Selector::Tag(tag) => node.tag.eq_ignore_ascii_case(tag),
            Selector::Class(class) => node
                .attrs
                .get("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == class)),
            Selector::HasAttr(name) => node.attrs.contains_key(name),
            Selector::AttrEquals { name, value } => node.attrs.get(name) == Some(value),
        }
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let caps = SELECTOR_REGEX
            .captures(trimmed)
            .ok_or_else(|| SelectorError(raw.to_string()))?;
        if let Some(attr) = caps.name("attr") {
            let name = attr.as_str().to_string();
            return Ok(match caps.name("value") {
                Some(value) => Selector::AttrEquals {
                    name,
                    value: value.as_str().to_string(),
                },
                None => Selector::HasAttr(name),
            });
        }
        if let Some(class) = caps.name("class") {
            return Ok(Selector::Class(class.as_str().to_string()));
        }
        match caps.name("tag") {
            Some(tag) => Ok(Selector::Tag(tag.as_str().to_ascii_lowercase())),
            None => Err(SelectorError(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectorSet {
    selectors: Vec<Selector>,
}

impl SelectorSet {
    pub fn parse<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Self, SelectorError> {
        let selectors = raw
            .into_iter()
            .map(Selector::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn tweets() -> Self {
        Self::parse(TWEET_SELECTORS).expect("built-in selectors parse")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter()
    }
}
