use std::{env, time::Duration};

use chrono_tz::Tz;
use url::Url;

use super::env::{
    AppConfig, ClassifierConfig, ConfigError, DirectoryConfig, LoggingConfig, SessionConfig,
    SiteConfig, WatcherConfig,
};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/analyze";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let default_backend_url =
            env::var("CLASSIFIER_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        if Url::parse(&default_backend_url).is_err() {
            return Err(ConfigError::Invalid {
                key: "CLASSIFIER_URL",
                value: default_backend_url,
            });
        }
        let classifier = ClassifierConfig {
            default_backend_url,
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "analyzer.db".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let timezone = env::var("PANEL_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        if timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Invalid {
                key: "PANEL_TIMEZONE",
                value: timezone,
            });
        }

        let defaults = WatcherConfig::default();
        let watcher = WatcherConfig {
            settle_delay: parse_u64("WATCHER_SETTLE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            min_text_length: env::var("WATCHER_MIN_TEXT_LENGTH")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.min_text_length),
        };

        let site_defaults = SiteConfig::default();
        let sites = SiteConfig {
            target_hosts: env::var("TARGET_SITES")
                .ok()
                .map(|value| {
                    value
                        .split(',')
                        .map(|part| part.trim().to_ascii_lowercase())
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|hosts| !hosts.is_empty())
                .unwrap_or(site_defaults.target_hosts),
            onboarding_url: env::var("ONBOARDING_URL").unwrap_or(site_defaults.onboarding_url),
        };

        let session = SessionConfig {
            feed_path: env::var("SESSION_FEED").ok().filter(|v| !v.is_empty()),
        };

        Ok(Self {
            classifier,
            directories,
            logging,
            timezone,
            watcher,
            sites,
            session,
        })
    }
}

fn parse_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok())
}
