use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use crate::{
    db::{
        store::{KEY_BACKEND_URL, KEY_IS_ENABLED, KEY_TOTAL_ANALYZED, KEY_TOXIC_COUNT},
        StoreReader,
    },
    domain::{SettingsPatch, Stats},
    messaging::{ActivityKind, BusError, Inbox, Message, MessageBus, Reply, Target},
};

use super::activity::ActivityLog;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("no active page")]
    NoActivePage,
    #[error("invalid backend url: {0:?}")]
    InvalidUrl(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: ActivityKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub total_analyzed: u64,
    pub toxic_count: u64,
    pub status: &'static str,
    pub backend_url: String,
    pub activities: Vec<String>,
}

#[derive(Default)]
struct PanelState {
    stats: Stats,
    enabled: bool,
    backend_url: String,
    activity: ActivityLog,
    notifications: Vec<Notification>,
}

impl PanelState {
    fn log(&mut self, text: impl Into<String>, kind: ActivityKind) {
        self.activity.push(text, kind, Utc::now());
    }

    fn notify(&mut self, message: impl Into<String>, kind: ActivityKind) {
        self.notifications.push(Notification {
            message: message.into(),
            kind,
        });
    }
}

pub struct ControlPanel {
    bus: MessageBus,
    timezone: Tz,
    state: Arc<Mutex<PanelState>>,
    listener: JoinHandle<()>,
}

impl ControlPanel {
    pub async fn open(bus: MessageBus, store: StoreReader, timezone: Tz) -> Self {
        let inbox = bus.attach_panel();
        let state = Arc::new(Mutex::new(PanelState {
            enabled: true,
            ..PanelState::default()
        }));

        match store
            .get(&[
                KEY_TOTAL_ANALYZED,
                KEY_TOXIC_COUNT,
                KEY_IS_ENABLED,
                KEY_BACKEND_URL,
            ])
            .await
        {
            Ok(entries) => {
                let mut state = state.lock();
                state.stats = Stats {
                    total_analyzed: entries
                        .get(KEY_TOTAL_ANALYZED)
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    toxic_count: entries
                        .get(KEY_TOXIC_COUNT)
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                };
                state.enabled = entries
                    .get(KEY_IS_ENABLED)
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if let Some(url) = entries.get(KEY_BACKEND_URL).and_then(Value::as_str) {
                    state.backend_url = url.to_string();
                }
            }
            Err(err) => {
                tracing::warn!(target: "panel", error = %err, "cached stats unavailable");
            }
        }

        let listener = tokio::spawn(listen(inbox, Arc::clone(&state)));
        let panel = Self {
            bus,
            timezone,
            state,
            listener,
        };
        tracing::info!(target: "panel", "panel opened");
        panel.request_stats().await;
        panel
    }

    pub async fn close(self) {
        self.bus.detach_panel();
        if let Err(err) = self.listener.await {
            tracing::warn!(target: "panel", error = %err, "panel listener ended abnormally");
        }
        tracing::info!(target: "panel", "panel closed");
    }

    pub async fn request_stats(&self) {
        let Some(tab) = self.bus.active_tab() else {
            return;
        };
        if let Err(err) = self.bus.request(Target::Tab(tab), Message::GetStats).await {
            tracing::debug!(target: "panel", tab = %tab, error = %err, "stats refresh skipped");
        }
    }

    pub async fn on_focus(&self) {
        self.request_stats().await;
    }

    pub async fn toggle_analysis(&self, enabled: bool) -> Result<(), PanelError> {
        match self.send_to_active(Message::ToggleAnalysis { enabled }).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.enabled = enabled;
                    let verb = if enabled { "enabled" } else { "disabled" };
                    state.log(format!("Analysis {verb}"), ActivityKind::Info);
                }
                self.save_settings(SettingsPatch {
                    is_enabled: Some(enabled),
                    ..SettingsPatch::default()
                })
                .await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(target: "panel", error = %err, "toggle failed");
                self.state
                    .lock()
                    .log("Error: Could not toggle analysis", ActivityKind::Error);
                Err(err)
            }
        }
    }

    pub async fn update_backend_url(&self, raw: &str) -> Result<(), PanelError> {
        let url = raw.trim();
        if !is_http_url(url) {
            self.state
                .lock()
                .notify("Please enter a valid URL", ActivityKind::Error);
            return Err(PanelError::InvalidUrl(url.to_string()));
        }

        let result = self.push_backend_url(url).await;

        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                tracing::info!(target: "panel", url, "backend url updated");
                state.backend_url = url.to_string();
                state.notify("Backend URL updated successfully", ActivityKind::Success);
                state.log("Backend URL updated", ActivityKind::Info);
            }
            Err(err) => {
                tracing::warn!(target: "panel", error = %err, "backend url update failed");
                state.notify("Error updating backend URL", ActivityKind::Error);
            }
        }
        result
    }

    pub async fn reset_stats(&self) -> Result<Stats, PanelError> {
        let reply = self
            .bus
            .request(Target::Coordinator, Message::ResetStats)
            .await?;
        let stats = check(reply)?.stats.unwrap_or_default();
        let mut state = self.state.lock();
        state.stats = stats;
        state.log("Statistics reset", ActivityKind::Success);
        Ok(stats)
    }

    pub fn view(&self) -> PanelView {
        let now = Utc::now();
        let state = self.state.lock();
        PanelView {
            total_analyzed: state.stats.total_analyzed,
            toxic_count: state.stats.toxic_count,
            status: if state.enabled { "Active" } else { "Paused" },
            backend_url: state.backend_url.clone(),
            activities: state
                .activity
                .entries()
                .map(|entry| entry.render(now, self.timezone))
                .collect(),
        }
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.state.lock().notifications)
    }

    async fn send_to_active(&self, message: Message) -> Result<(), PanelError> {
        let tab = self.bus.active_tab().ok_or(PanelError::NoActivePage)?;
        let reply = self.bus.request(Target::Tab(tab), message).await?;
        check(reply).map(|_| ())
    }

    async fn push_backend_url(&self, url: &str) -> Result<(), PanelError> {
        self.send_to_active(Message::UpdateBackendUrl {
            url: url.to_string(),
        })
        .await?;
        let reply = self
            .bus
            .request(
                Target::Coordinator,
                Message::UpdateSettings {
                    settings: SettingsPatch {
                        backend_url: Some(url.to_string()),
                        ..SettingsPatch::default()
                    },
                },
            )
            .await?;
        check(reply).map(|_| ())
    }

    async fn save_settings(&self, patch: SettingsPatch) {
        let outcome = self
            .bus
            .request(Target::Coordinator, Message::UpdateSettings { settings: patch })
            .await;
        if let Err(err) = outcome {
            tracing::warn!(target: "panel", error = %err, "settings not saved");
        }
    }
}

fn check(reply: Reply) -> Result<Reply, PanelError> {
    match reply.error {
        Some(error) => Err(PanelError::Rejected(error)),
        None => Ok(reply),
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

async fn listen(mut inbox: Inbox, state: Arc<Mutex<PanelState>>) {
    while let Some(envelope) = inbox.recv().await {
        let (message, responder) = envelope.into_parts();
        match message {
            Message::StatsUpdated { stats } => state.lock().stats = stats,
            Message::AddActivity { text, kind } => state.lock().log(text, kind),
            other => {
                tracing::debug!(target: "panel", action = other.action(), "ignored message");
            }
        }
        responder.send(Reply::ack());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::{SiteConfig, WatcherConfig},
        coordinator::Coordinator,
        db::{KeyValueStore, MemoryStore},
        domain::{AnnotationState, Label, Settings},
        infrastructure::shutdown::Shutdown,
        testing::{eventually, tweet, FakeClassifier, Verdict},
        watcher::DocumentWatcher,
    };

    use crate::config::DEFAULT_BACKEND_URL as DEFAULT_URL;
    const LONG_TEXT: &str = "a perfectly ordinary post about the weather today";

    struct Stack {
        bus: MessageBus,
        store: Arc<MemoryStore>,
        coordinator: Arc<Coordinator>,
        shutdown: Shutdown,
    }

    async fn stack() -> Stack {
        let bus = MessageBus::new();
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::initialize(
            store.clone(),
            bus.clone(),
            SiteConfig::default(),
            Settings::with_backend(DEFAULT_URL),
        )
        .await;
        let (shutdown, _) = Shutdown::new();
        Arc::clone(&coordinator).spawn(shutdown.subscribe());
        Stack {
            bus,
            store,
            coordinator,
            shutdown,
        }
    }

    fn reader(store: &Arc<MemoryStore>) -> StoreReader {
        let store: Arc<dyn KeyValueStore> = store.clone();
        StoreReader::new(store)
    }

    #[tokio::test]
    async fn invalid_url_only_notifies() {
        let s = stack().await;
        let panel = ControlPanel::open(s.bus.clone(), reader(&s.store), Tz::UTC).await;

        for raw in ["", "   ", "ftp://example.test", "not a url"] {
            let err = panel.update_backend_url(raw).await.unwrap_err();
            assert!(matches!(err, PanelError::InvalidUrl(_)));
        }
        let notes = panel.take_notifications();
        assert_eq!(notes.len(), 4);
        assert!(notes
            .iter()
            .all(|n| n.message == "Please enter a valid URL" && n.kind == ActivityKind::Error));
        assert!(panel.view().activities.is_empty());
        assert!(s.store.snapshot().get(KEY_BACKEND_URL).is_none());
        panel.close().await;
    }

    #[tokio::test]
    async fn toggle_without_page_logs_error() {
        let s = stack().await;
        let panel = ControlPanel::open(s.bus.clone(), reader(&s.store), Tz::UTC).await;

        assert!(matches!(
            panel.toggle_analysis(false).await,
            Err(PanelError::NoActivePage)
        ));
        let view = panel.view();
        assert_eq!(view.status, "Active");
        assert_eq!(
            view.activities,
            vec!["❌ Error: Could not toggle analysis · Just now"]
        );
        panel.close().await;
    }

    #[tokio::test]
    async fn broadcasts_and_activities_reach_open_panel() {
        let s = stack().await;
        let panel = ControlPanel::open(s.bus.clone(), reader(&s.store), Tz::UTC).await;

        s.bus
            .request(Target::Coordinator, Message::IncrementAnalyzed)
            .await
            .unwrap();
        s.bus
            .notify(
                Target::Panel,
                Message::AddActivity {
                    text: "Toxic content detected (91.0%)".into(),
                    kind: ActivityKind::Warning,
                },
            )
            .unwrap();
        eventually(|| panel.view().total_analyzed == 1 && !panel.view().activities.is_empty())
            .await;
        assert_eq!(
            panel.view().activities[0],
            "⚠️ Toxic content detected (91.0%) · Just now"
        );

        let stats = panel.reset_stats().await.unwrap();
        assert_eq!(stats, Stats::default());
        assert_eq!(panel.view().total_analyzed, 0);

        panel.close().await;
        assert!(!s.bus.is_panel_open());
        s.shutdown.trigger("test");
    }

    #[tokio::test]
    async fn backend_url_change_reaches_store_and_page() {
        let s = stack().await;
        let tab = s.bus.open_tab("https://x.com/home");
        let doc = crate::document::Document::new();
        let classifier = Arc::new(FakeClassifier::new(Verdict::Score(Label::Safe, 0.05)));
        let watcher = DocumentWatcher::new(
            tab,
            doc.clone(),
            classifier.clone(),
            s.bus.clone(),
            WatcherConfig {
                settle_delay: Duration::ZERO,
                ..WatcherConfig::default()
            },
            DEFAULT_URL,
        );
        Arc::clone(&watcher)
            .attach(s.shutdown.subscribe())
            .await
            .unwrap();

        let panel = ControlPanel::open(s.bus.clone(), reader(&s.store), Tz::UTC).await;
        panel
            .update_backend_url("  https://example.test/analyze ")
            .await
            .unwrap();

        assert_eq!(
            s.store.snapshot()[KEY_BACKEND_URL],
            serde_json::json!("https://example.test/analyze")
        );
        assert_eq!(
            s.coordinator.settings().backend_url,
            "https://example.test/analyze"
        );
        assert_eq!(
            panel.take_notifications(),
            vec![Notification {
                message: "Backend URL updated successfully".into(),
                kind: ActivityKind::Success,
            }]
        );

        let article = doc.append(doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| matches!(watcher.state_of(article), AnnotationState::Annotated(_))).await;
        assert_eq!(classifier.calls()[0].0, "https://example.test/analyze");

        // the page's counters flow back through the coordinator broadcast
        eventually(|| panel.view().total_analyzed == 1).await;
        panel.on_focus().await;

        panel.toggle_analysis(false).await.unwrap();
        assert!(!watcher.is_enabled());
        assert_eq!(panel.view().status, "Paused");
        assert_eq!(
            s.store.snapshot()[KEY_IS_ENABLED],
            serde_json::json!(false)
        );

        panel.close().await;
        s.shutdown.trigger("test");
    }
}
