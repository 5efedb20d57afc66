use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono_tz::Tz;
use futures::future::join_all;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    task::JoinHandle,
};

use crate::{
    classifier::Classifier,
    config::{SiteConfig, WatcherConfig},
    coordinator::Coordinator,
    db::StoreReader,
    document::{Document, NodeId},
    domain::Stats,
    infrastructure::shutdown::{Shutdown, ShutdownListener},
    messaging::{MessageBus, TabId},
    panel::ControlPanel,
    watcher::DocumentWatcher,
};

use super::feed::{parse_line, PanelOp, SessionEvent};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown page {0:?}")]
    UnknownPage(String),
    #[error("page {page:?} already open")]
    DuplicatePage { page: String },
    #[error("page {page:?} has no node keyed {key:?}")]
    UnknownKey { page: String, key: String },
    #[error("structural change rejected on page {page:?}")]
    Rejected { page: String },
    #[error("panel is not open")]
    PanelClosed,
    #[error(transparent)]
    Watcher(#[from] crate::watcher::WatcherError),
}

pub struct SessionContext {
    pub bus: MessageBus,
    pub coordinator: Arc<Coordinator>,
    pub classifier: Arc<dyn Classifier>,
    pub store: StoreReader,
    pub sites: SiteConfig,
    pub watcher: WatcherConfig,
    pub default_backend_url: String,
    pub timezone: Tz,
}

struct Page {
    tab: TabId,
    url: String,
    document: Document,
    keys: HashMap<String, NodeId>,
    watcher: Option<(Arc<DocumentWatcher>, JoinHandle<()>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub page: String,
    pub url: String,
    pub watched: bool,
    pub stats: Stats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub rejected: usize,
    pub pages: Vec<PageSummary>,
    pub global: Stats,
}

pub struct SessionReplayer {
    ctx: SessionContext,
    pages: HashMap<String, Page>,
    panel: Option<ControlPanel>,
    stop: Shutdown,
    events: usize,
    rejected: usize,
}

impl SessionReplayer {
    pub fn new(ctx: SessionContext) -> Self {
        let (stop, _) = Shutdown::new();
        Self {
            ctx,
            pages: HashMap::new(),
            panel: None,
            stop,
            events: 0,
            rejected: 0,
        }
    }

    pub async fn run<R>(mut self, feed: R, mut shutdown: ShutdownListener) -> ReplaySummary
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = feed.lines();
        let mut line_no = 0;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = shutdown.notified() => break,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(target: "session", error = %err, "feed read failed");
                    break;
                }
            };
            line_no += 1;

            let event = match parse_line(line_no, &line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(target: "session", error = %err, "skipping feed line");
                    self.rejected += 1;
                    continue;
                }
            };
            self.events += 1;
            if let Err(err) = self.apply(event).await {
                tracing::warn!(target: "session", line = line_no, error = %err, "event rejected");
                self.rejected += 1;
            }
        }
        self.finish().await
    }

    pub async fn apply(&mut self, event: SessionEvent) -> Result<(), ReplayError> {
        match event {
            SessionEvent::Open { page, url } => {
                if self.pages.contains_key(&page) {
                    return Err(ReplayError::DuplicatePage { page });
                }
                let tab = self.ctx.bus.open_tab(url.clone());
                let loaded = self.load(tab, url).await?;
                tracing::info!(target: "session", page = %page, tab = %tab, "page opened");
                self.pages.insert(page, loaded);
            }
            SessionEvent::Navigate { page, url } => {
                let current = self.take_page(&page)?;
                let tab = current.tab;
                self.ctx.bus.navigate(tab, url.clone());
                self.unload(current).await;
                let loaded = self.load(tab, url).await?;
                self.pages.insert(page, loaded);
            }
            SessionEvent::Activate { page } => {
                let tab = self.page(&page)?.tab;
                self.ctx.bus.activate(tab);
            }
            SessionEvent::Close { page } => {
                let current = self.take_page(&page)?;
                self.ctx.bus.close_tab(current.tab);
                self.unload(current).await;
            }
            SessionEvent::Append { page, parent, node } => {
                let target = self.page_mut(&page)?;
                let parent = target.resolve(&page, parent.as_deref())?;
                let tree = target
                    .document
                    .append(parent, &node)
                    .ok_or_else(|| ReplayError::Rejected { page: page.clone() })?;
                target.keys.extend(tree.keyed);
            }
            SessionEvent::Move { page, key, parent } => {
                let target = self.page_mut(&page)?;
                let node = target.resolve(&page, Some(&key))?;
                let parent = target.resolve(&page, parent.as_deref())?;
                if !target.document.move_to(node, parent) {
                    return Err(ReplayError::Rejected { page });
                }
            }
            SessionEvent::Remove { page, key } => {
                let target = self.page_mut(&page)?;
                let node = target.resolve(&page, Some(&key))?;
                if !target.document.remove(node) {
                    return Err(ReplayError::Rejected { page });
                }
            }
            SessionEvent::Panel { op } => self.panel_op(op).await?,
            SessionEvent::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        Ok(())
    }

    async fn panel_op(&mut self, op: PanelOp) -> Result<(), ReplayError> {
        if let PanelOp::Open = op {
            if self.panel.is_none() {
                self.panel = Some(
                    ControlPanel::open(
                        self.ctx.bus.clone(),
                        self.ctx.store.clone(),
                        self.ctx.timezone,
                    )
                    .await,
                );
            }
            return Ok(());
        }
        if let PanelOp::Close = op {
            if let Some(panel) = self.panel.take() {
                log_panel(&panel);
                panel.close().await;
            }
            return Ok(());
        }

        let panel = self.panel.as_ref().ok_or(ReplayError::PanelClosed)?;
        let outcome = match op {
            PanelOp::Focus => {
                panel.on_focus().await;
                Ok(())
            }
            PanelOp::Toggle { enabled } => panel.toggle_analysis(enabled).await,
            PanelOp::SetBackendUrl { url } => panel.update_backend_url(&url).await,
            PanelOp::ResetStats => panel.reset_stats().await.map(|_| ()),
            PanelOp::Open | PanelOp::Close => Ok(()),
        };
        if let Err(err) = outcome {
            // the panel already surfaced the failure as a notification or activity
            tracing::info!(target: "session", error = %err, "panel action failed");
        }
        for note in panel.take_notifications() {
            tracing::info!(target: "panel", kind = ?note.kind, "{}", note.message);
        }
        Ok(())
    }

    async fn load(&self, tab: TabId, url: String) -> Result<Page, ReplayError> {
        self.ctx.coordinator.observe_navigation(tab, &url);
        let document = Document::new();
        let watcher = if self.ctx.sites.matches(&url) {
            let watcher = DocumentWatcher::new(
                tab,
                document.clone(),
                Arc::clone(&self.ctx.classifier),
                self.ctx.bus.clone(),
                self.ctx.watcher.clone(),
                self.ctx.default_backend_url.clone(),
            );
            let handle = Arc::clone(&watcher).attach(self.stop.subscribe()).await?;
            Some((watcher, handle))
        } else {
            None
        };
        Ok(Page {
            tab,
            url,
            document,
            keys: HashMap::new(),
            watcher,
        })
    }

    async fn unload(&self, page: Page) {
        if let Some((watcher, handle)) = page.watcher {
            // the tab endpoint is gone, so the loop ends on its own
            if let Err(err) = handle.await {
                tracing::warn!(target: "session", tab = %watcher.tab(), error = %err, "watcher ended abnormally");
            }
            tracing::debug!(
                target: "session",
                url = %page.url,
                analyzed = watcher.local_stats().total_analyzed,
                "page unloaded"
            );
        }
    }

    fn page(&self, name: &str) -> Result<&Page, ReplayError> {
        self.pages
            .get(name)
            .ok_or_else(|| ReplayError::UnknownPage(name.to_string()))
    }

    fn page_mut(&mut self, name: &str) -> Result<&mut Page, ReplayError> {
        self.pages
            .get_mut(name)
            .ok_or_else(|| ReplayError::UnknownPage(name.to_string()))
    }

    fn take_page(&mut self, name: &str) -> Result<Page, ReplayError> {
        self.pages
            .remove(name)
            .ok_or_else(|| ReplayError::UnknownPage(name.to_string()))
    }

    async fn finish(mut self) -> ReplaySummary {
        for _ in 0..50 {
            let busy = self
                .pages
                .values()
                .filter_map(|page| page.watcher.as_ref())
                .any(|(watcher, _)| watcher.in_flight() > 0);
            if !busy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut pages: Vec<PageSummary> = self
            .pages
            .iter()
            .map(|(name, page)| PageSummary {
                page: name.clone(),
                url: page.url.clone(),
                watched: page.watcher.is_some(),
                stats: page
                    .watcher
                    .as_ref()
                    .map(|(watcher, _)| watcher.local_stats())
                    .unwrap_or_default(),
            })
            .collect();
        pages.sort_by(|a, b| a.page.cmp(&b.page));

        if let Some(panel) = self.panel.take() {
            log_panel(&panel);
            panel.close().await;
        }
        self.stop.trigger("session finished");
        let handles: Vec<_> = self
            .pages
            .drain()
            .filter_map(|(_, page)| page.watcher.map(|(_, handle)| handle))
            .collect();
        for joined in join_all(handles).await {
            if let Err(err) = joined {
                tracing::warn!(target: "session", error = %err, "watcher task ended abnormally");
            }
        }

        let summary = ReplaySummary {
            events: self.events,
            rejected: self.rejected,
            pages,
            global: self.ctx.coordinator.stats(),
        };
        tracing::info!(
            target: "session",
            events = summary.events,
            rejected = summary.rejected,
            total = summary.global.total_analyzed,
            toxic = summary.global.toxic_count,
            "session replay finished"
        );
        summary
    }
}

impl Page {
    /// `None` means the document root.
    fn resolve(&self, page: &str, key: Option<&str>) -> Result<NodeId, ReplayError> {
        match key {
            None => Ok(self.document.root()),
            Some(key) => self
                .keys
                .get(key)
                .copied()
                .filter(|node| self.document.contains(*node))
                .ok_or_else(|| ReplayError::UnknownKey {
                    page: page.to_string(),
                    key: key.to_string(),
                }),
        }
    }
}

fn log_panel(panel: &ControlPanel) {
    let view = panel.view();
    tracing::info!(
        target: "panel",
        total = view.total_analyzed,
        toxic = view.toxic_count,
        status = view.status,
        "panel view"
    );
    for line in &view.activities {
        tracing::info!(target: "panel", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{store::KEY_BACKEND_URL, KeyValueStore, MemoryStore},
        domain::{Label, Settings},
        testing::{FakeClassifier, Verdict},
    };

    use crate::config::DEFAULT_BACKEND_URL as DEFAULT_URL;

    async fn context(classifier: Arc<FakeClassifier>) -> (SessionContext, Arc<MemoryStore>, Shutdown) {
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
        let reader: Arc<dyn KeyValueStore> = store.clone();
        let ctx = SessionContext {
            bus,
            coordinator,
            classifier,
            store: StoreReader::new(reader),
            sites: SiteConfig::default(),
            watcher: WatcherConfig {
                settle_delay: Duration::from_millis(5),
                ..WatcherConfig::default()
            },
            default_backend_url: DEFAULT_URL.to_string(),
            timezone: Tz::UTC,
        };
        (ctx, store, shutdown)
    }

    const FEED: &str = r#"
# two pages, only one of them on a target site
{"event":"open","page":"feed","url":"https://x.com/home"}
{"event":"open","page":"docs","url":"https://example.org/"}
{"event":"activate","page":"feed"}
{"event":"panel","op":"open"}
{"event":"panel","op":"set_backend_url","url":"https://example.test/analyze"}
{"event":"append","page":"feed","node":{"tag":"article","key":"p1","attrs":{"data-testid":"tweet"},"children":[{"tag":"div","attrs":{"data-testid":"tweetText"},"text":"you are all terrible people and I hate this"}]}}
{"event":"append","page":"docs","node":{"tag":"article","attrs":{"data-testid":"tweet"},"children":[{"tag":"div","attrs":{"data-testid":"tweetText"},"text":"this page is not a target site at all"}]}}
{"event":"append","page":"feed","node":{"tag":"section","key":"side"}}
{"event":"move","page":"feed","key":"p1","parent":"side"}
{"event":"wait","ms":50}
{"event":"remove","page":"feed","key":"missing"}
not json
{"event":"panel","op":"focus"}
"#;

    #[tokio::test]
    async fn replays_feed_against_live_contexts() {
        let classifier = Arc::new(FakeClassifier::new(Verdict::Score(Label::Toxic, 0.92)));
        let (ctx, store, shutdown) = context(classifier.clone()).await;
        let (_stop, listener) = Shutdown::new();

        let summary = SessionReplayer::new(ctx)
            .run(FEED.as_bytes(), listener)
            .await;

        assert_eq!(summary.events, 12);
        assert_eq!(summary.rejected, 2);
        assert_eq!(classifier.call_count(), 1);
        assert_eq!(classifier.calls()[0].0, "https://example.test/analyze");
        assert_eq!(
            store.snapshot()[KEY_BACKEND_URL],
            serde_json::json!("https://example.test/analyze")
        );

        let feed = summary.pages.iter().find(|p| p.page == "feed").unwrap();
        assert!(feed.watched);
        assert_eq!(feed.stats.total_analyzed, 1);
        assert_eq!(feed.stats.toxic_count, 1);
        let docs = summary.pages.iter().find(|p| p.page == "docs").unwrap();
        assert!(!docs.watched);
        assert_eq!(summary.global.toxic_count, 1);
        shutdown.trigger("test");
    }

    #[tokio::test]
    async fn navigation_starts_a_fresh_document() {
        let classifier = Arc::new(FakeClassifier::new(Verdict::Score(Label::Safe, 0.1)));
        let (ctx, _store, shutdown) = context(classifier.clone()).await;
        let mut replayer = SessionReplayer::new(ctx);

        replayer
            .apply(SessionEvent::Open {
                page: "p".into(),
                url: "https://mobile.twitter.com/home".into(),
            })
            .await
            .unwrap();
        replayer
            .apply(SessionEvent::Append {
                page: "p".into(),
                parent: None,
                node: crate::testing::tweet("first page content long enough"),
            })
            .await
            .unwrap();
        replayer
            .apply(SessionEvent::Navigate {
                page: "p".into(),
                url: "https://x.com/explore".into(),
            })
            .await
            .unwrap();
        let err = replayer
            .apply(SessionEvent::Remove {
                page: "p".into(),
                key: "tweet".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::UnknownKey { .. }));
        assert!(matches!(
            replayer.apply(SessionEvent::Activate { page: "q".into() }).await,
            Err(ReplayError::UnknownPage(_))
        ));
        assert!(matches!(
            replayer
                .apply(SessionEvent::Panel {
                    op: PanelOp::Focus
                })
                .await,
            Err(ReplayError::PanelClosed)
        ));

        let (_stop, listener) = Shutdown::new();
        let summary = replayer.run(&b""[..], listener).await;
        assert_eq!(summary.pages.len(), 1);
        assert_eq!(summary.pages[0].url, "https://x.com/explore");
        shutdown.trigger("test");
    }
}
