use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub timezone: String,
    pub watcher: WatcherConfig,
    pub sites: SiteConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub default_backend_url: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub settle_delay: Duration,
    pub min_text_length: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2_000),
            min_text_length: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub target_hosts: Vec<String>,
    pub onboarding_url: String,
}

impl SiteConfig {
    pub fn matches(&self, raw_url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(raw_url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.target_hosts.iter().any(|target| {
            host == *target
                || host
                    .strip_suffix(target.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            target_hosts: vec!["twitter.com".to_string(), "x.com".to_string()],
            onboarding_url: "app://content-analyzer/welcome.html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub feed_path: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
