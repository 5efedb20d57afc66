use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    config::SiteConfig,
    db::{
        store::{KEY_BACKEND_URL, KEY_IS_ENABLED, KEY_TOTAL_ANALYZED, KEY_TOXIC_COUNT},
        KeyValueStore, StoreEntries,
    },
    domain::{Settings, SettingsPatch, Stats},
    infrastructure::shutdown::ShutdownListener,
    messaging::{Message, MessageBus, Reply, TabId, Target},
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Unknown action")]
    UnknownAction(&'static str),
}

struct CoordinatorState {
    stats: Stats,
    settings: Settings,
}

pub struct Coordinator {
    pub(super) store: Arc<dyn KeyValueStore>,
    pub(super) bus: MessageBus,
    pub(super) defaults: Settings,
    pub(super) onboarding_url: String,
    sites: SiteConfig,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub async fn initialize(
        store: Arc<dyn KeyValueStore>,
        bus: MessageBus,
        sites: SiteConfig,
        defaults: Settings,
    ) -> Arc<Self> {
        let (stats, settings) = load_state(store.as_ref(), &defaults).await;
        tracing::info!(
            target: "coordinator",
            total = stats.total_analyzed,
            toxic = stats.toxic_count,
            backend = %settings.backend_url,
            enabled = settings.is_enabled,
            "state loaded"
        );
        Arc::new(Self {
            store,
            bus,
            defaults,
            onboarding_url: sites.onboarding_url.clone(),
            sites,
            state: Mutex::new(CoordinatorState { stats, settings }),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        let mut inbox = self.bus.register_coordinator();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    envelope = inbox.recv() => {
                        let Some(envelope) = envelope else { break };
                        let (message, responder) = envelope.into_parts();
                        let reply = self.handle(message).await;
                        responder.send(reply);
                    }
                    _ = shutdown.notified() => break,
                }
            }
            tracing::info!(target: "coordinator", "coordinator stopped");
        })
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().stats
    }

    pub fn settings(&self) -> Settings {
        self.state.lock().settings.clone()
    }

    /// Produces exactly one reply for every message.
    pub async fn handle(&self, message: Message) -> Reply {
        match message {
            Message::UpdateStats { stats } => {
                let snapshot = self.mutate_stats(|current| current.merge(stats));
                self.persist_stats(snapshot).await;
                self.broadcast(snapshot);
                Reply::ack()
            }
            Message::GetStats => Reply::stats(self.stats()),
            Message::IncrementAnalyzed => {
                let snapshot = self.mutate_stats(|current| {
                    current.total_analyzed = current.total_analyzed.saturating_add(1)
                });
                self.commit(snapshot).await
            }
            Message::IncrementToxic => {
                let snapshot = self.mutate_stats(|current| {
                    current.toxic_count = current.toxic_count.saturating_add(1)
                });
                self.commit(snapshot).await
            }
            Message::ResetStats => {
                let snapshot = self.mutate_stats(|current| *current = Stats::default());
                self.commit(snapshot).await
            }
            Message::GetSettings => Reply::settings(self.settings()),
            Message::UpdateSettings { settings } => {
                let snapshot = {
                    let mut state = self.state.lock();
                    state.settings.merge(settings.clone());
                    state.settings.clone()
                };
                self.persist_settings(&settings).await;
                Reply::ack_with_settings(snapshot)
            }
            other => {
                let err = CoordinatorError::UnknownAction(other.action());
                tracing::warn!(target: "coordinator", action = other.action(), "unhandled message");
                Reply::error(err.to_string())
            }
        }
    }

    pub fn observe_navigation(&self, tab: TabId, url: &str) {
        if self.sites.matches(url) {
            tracing::info!(target: "coordinator", tab = %tab, url, "target page detected");
        }
    }

    pub(super) fn replace_state(&self, stats: Stats, settings: Settings) {
        let mut state = self.state.lock();
        state.stats = stats;
        state.settings = settings;
    }

    fn mutate_stats(&self, apply: impl FnOnce(&mut Stats)) -> Stats {
        let mut state = self.state.lock();
        apply(&mut state.stats);
        state.stats
    }

    async fn commit(&self, snapshot: Stats) -> Reply {
        self.persist_stats(snapshot).await;
        self.broadcast(snapshot);
        Reply::ack_with_stats(snapshot)
    }

    async fn persist_stats(&self, stats: Stats) {
        let entries = StoreEntries::from([
            (KEY_TOTAL_ANALYZED.to_string(), json!(stats.total_analyzed)),
            (KEY_TOXIC_COUNT.to_string(), json!(stats.toxic_count)),
        ]);
        if let Err(err) = self.store.set(entries).await {
            tracing::warn!(target: "coordinator", error = %err, "failed to persist stats");
        }
    }

    async fn persist_settings(&self, patch: &SettingsPatch) {
        let mut entries = StoreEntries::new();
        if let Some(url) = &patch.backend_url {
            entries.insert(KEY_BACKEND_URL.to_string(), json!(url));
        }
        if let Some(enabled) = patch.is_enabled {
            entries.insert(KEY_IS_ENABLED.to_string(), json!(enabled));
        }
        if entries.is_empty() {
            return;
        }
        if let Err(err) = self.store.set(entries).await {
            tracing::warn!(target: "coordinator", error = %err, "failed to persist settings");
        }
    }

    fn broadcast(&self, stats: Stats) {
        for tab in self.bus.tabs() {
            if !self.sites.matches(&tab.url) {
                continue;
            }
            if let Err(err) = self
                .bus
                .notify(Target::Tab(tab.id), Message::StatsUpdated { stats })
            {
                tracing::debug!(target: "coordinator", error = %err, "stats broadcast skipped");
            }
        }
        if let Err(err) = self
            .bus
            .notify(Target::Panel, Message::StatsUpdated { stats })
        {
            tracing::debug!(target: "coordinator", error = %err, "panel not open");
        }
    }
}

async fn load_state(store: &dyn KeyValueStore, defaults: &Settings) -> (Stats, Settings) {
    let keys = [
        KEY_TOTAL_ANALYZED,
        KEY_TOXIC_COUNT,
        KEY_BACKEND_URL,
        KEY_IS_ENABLED,
    ];
    let entries = match store.get(&keys).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(target: "coordinator", error = %err, "failed to load state; using defaults");
            StoreEntries::new()
        }
    };

    let stats = Stats {
        total_analyzed: entries
            .get(KEY_TOTAL_ANALYZED)
            .and_then(Value::as_u64)
            .unwrap_or(0),
        toxic_count: entries
            .get(KEY_TOXIC_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };
    let settings = Settings {
        backend_url: entries
            .get(KEY_BACKEND_URL)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| defaults.backend_url.clone()),
        is_enabled: entries
            .get(KEY_IS_ENABLED)
            .and_then(Value::as_bool)
            .unwrap_or(defaults.is_enabled),
    };
    (stats, settings)
}
