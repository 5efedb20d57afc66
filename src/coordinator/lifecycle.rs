use semver::Version;
use serde_json::{json, Value};

use crate::db::store::{
    StoreEntries, KEY_BACKEND_URL, KEY_INSTALLED_VERSION, KEY_IS_ENABLED, KEY_TOTAL_ANALYZED,
    KEY_TOXIC_COUNT,
};
use crate::domain::{Settings, Stats};

use super::Coordinator;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update { previous: Version },
    Unchanged,
}

pub fn classify_install(stored: Option<&Value>, current: &Version) -> InstallReason {
    let Some(raw) = stored.and_then(Value::as_str) else {
        return InstallReason::Install;
    };
    match Version::parse(raw) {
        Ok(previous) if previous < *current => InstallReason::Update { previous },
        Ok(_) => InstallReason::Unchanged,
        Err(err) => {
            tracing::warn!(
                target: "coordinator",
                stored = raw,
                error = %err,
                "stored version is unreadable; treating as update"
            );
            InstallReason::Update {
                previous: Version::new(0, 0, 0),
            }
        }
    }
}

pub(super) fn seed_entries(settings: &Settings) -> StoreEntries {
    let stats = Stats::default();
    StoreEntries::from([
        (KEY_BACKEND_URL.to_string(), json!(settings.backend_url)),
        (KEY_IS_ENABLED.to_string(), json!(settings.is_enabled)),
        (KEY_TOTAL_ANALYZED.to_string(), json!(stats.total_analyzed)),
        (KEY_TOXIC_COUNT.to_string(), json!(stats.toxic_count)),
        (KEY_INSTALLED_VERSION.to_string(), json!(CURRENT_VERSION)),
    ])
}

impl Coordinator {
    pub async fn run_install_check(&self) -> Option<InstallReason> {
        let current = match Version::parse(CURRENT_VERSION) {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(target: "coordinator", error = %err, "crate version is not semver");
                return None;
            }
        };

        let stored = match self.store.get(&[KEY_INSTALLED_VERSION]).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    target: "coordinator",
                    error = %err,
                    "install check skipped; store unreadable"
                );
                return None;
            }
        };

        let reason = classify_install(stored.get(KEY_INSTALLED_VERSION), &current);
        match &reason {
            InstallReason::Install => {
                tracing::info!(target: "coordinator", version = CURRENT_VERSION, "first install");
                let defaults = self.defaults.clone();
                self.replace_state(Stats::default(), defaults.clone());
                if let Err(err) = self.store.set(seed_entries(&defaults)).await {
                    tracing::warn!(target: "coordinator", error = %err, "failed to seed defaults");
                }
                let tab = self.bus.open_tab(self.onboarding_url.clone());
                tracing::info!(
                    target: "coordinator",
                    tab = %tab,
                    url = %self.onboarding_url,
                    "onboarding page opened"
                );
            }
            InstallReason::Update { previous } => {
                tracing::info!(
                    target: "coordinator",
                    from = %previous,
                    to = CURRENT_VERSION,
                    "updated"
                );
                let entries = StoreEntries::from([(
                    KEY_INSTALLED_VERSION.to_string(),
                    json!(CURRENT_VERSION),
                )]);
                if let Err(err) = self.store.set(entries).await {
                    tracing::warn!(target: "coordinator", error = %err, "failed to record version");
                }
            }
            InstallReason::Unchanged => {}
        }
        Some(reason)
    }
}
