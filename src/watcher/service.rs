use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    classifier::{Classifier, ClassifierError},
    config::WatcherConfig,
    document::{
        Document, MutationBatch, MutationStream, NodeId, Selector, SelectorSet, TWEET_CONTAINER,
        TWEET_TEXT,
    },
    domain::{AnalysisResult, AnnotationState, CandidateId, Stats},
    infrastructure::shutdown::ShutdownListener,
    messaging::{ActivityKind, Inbox, Message, MessageBus, Reply, TabId, Target},
};

use super::{
    indicator::{
        status_bar, status_text, toggle_glyph, Indicator, ResultBadge, STATUS_TEXT_KEY,
        STATUS_TOGGLE_KEY,
    },
    registry::AnnotationRegistry,
};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("tab {0} is closed")]
    TabClosed(TabId),
}

struct WatcherState {
    enabled: bool,
    backend_url: String,
    registry: AnnotationRegistry,
    status_text: Option<NodeId>,
    status_toggle: Option<NodeId>,
    last_broadcast: Option<Stats>,
}

pub struct DocumentWatcher {
    tab: TabId,
    document: Document,
    classifier: Arc<dyn Classifier>,
    bus: MessageBus,
    selectors: SelectorSet,
    container: Selector,
    canonical_text: Selector,
    config: WatcherConfig,
    state: Mutex<WatcherState>,
}

impl DocumentWatcher {
    pub fn new(
        tab: TabId,
        document: Document,
        classifier: Arc<dyn Classifier>,
        bus: MessageBus,
        config: WatcherConfig,
        default_backend_url: impl Into<String>,
    ) -> Arc<Self> {
        let container = TWEET_CONTAINER
            .parse()
            .expect("built-in container selector parses");
        let canonical_text = TWEET_TEXT.parse().expect("built-in text selector parses");
        Arc::new(Self {
            tab,
            document,
            classifier,
            bus,
            selectors: SelectorSet::tweets(),
            container,
            canonical_text,
            config,
            state: Mutex::new(WatcherState {
                enabled: true,
                backend_url: default_backend_url.into(),
                registry: AnnotationRegistry::default(),
                status_text: None,
                status_toggle: None,
                last_broadcast: None,
            }),
        })
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub async fn attach(
        self: Arc<Self>,
        shutdown: ShutdownListener,
    ) -> Result<JoinHandle<()>, WatcherError> {
        let mutations = self.document.observe();
        let inbox = self
            .bus
            .attach_tab(self.tab)
            .ok_or(WatcherError::TabClosed(self.tab))?;

        self.load_settings().await;
        self.install_status_bar();

        tracing::info!(
            target: "watcher",
            tab = %self.tab,
            enabled = self.is_enabled(),
            settle_ms = self.config.settle_delay.as_millis() as u64,
            "watcher attached"
        );
        Ok(tokio::spawn(self.run(inbox, mutations, shutdown)))
    }

    async fn load_settings(&self) {
        let reply = match self.bus.request(Target::Coordinator, Message::GetSettings).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(target: "watcher", tab = %self.tab, error = %err, "settings unavailable; using defaults");
                return;
            }
        };
        if let Some(settings) = reply.settings {
            let mut state = self.state.lock();
            state.enabled = settings.is_enabled;
            state.backend_url = settings.backend_url;
        }
    }

    fn install_status_bar(&self) {
        let enabled = self.is_enabled();
        let Some(tree) = self.document.append(self.document.root(), &status_bar(enabled)) else {
            return;
        };
        let mut state = self.state.lock();
        state.status_text = tree.node(STATUS_TEXT_KEY);
        state.status_toggle = tree.node(STATUS_TOGGLE_KEY);
    }

    async fn run(
        self: Arc<Self>,
        mut inbox: Inbox,
        mut mutations: MutationStream,
        mut shutdown: ShutdownListener,
    ) {
        let settle = tokio::time::sleep(self.config.settle_delay);
        tokio::pin!(settle);
        let mut settled = false;

        loop {
            tokio::select! {
                _ = &mut settle, if !settled => {
                    settled = true;
                    let started = self.scan(self.document.root());
                    tracing::debug!(target: "watcher", tab = %self.tab, started, "initial scan");
                }
                batch = mutations.next() => {
                    let Some(batch) = batch else { break };
                    self.on_mutation(&batch);
                }
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    let (message, responder) = envelope.into_parts();
                    responder.send(self.handle_message(message));
                }
                _ = shutdown.notified() => break,
            }
        }
        tracing::info!(target: "watcher", tab = %self.tab, "watcher detached");
    }

    pub fn on_mutation(self: &Arc<Self>, batch: &MutationBatch) {
        for root in &batch.added {
            self.scan(*root);
        }
    }

    fn scan(self: &Arc<Self>, root: NodeId) -> usize {
        let mut started = 0;
        for selector in self.selectors.iter() {
            for node in self.document.query_all(root, selector) {
                if self.consider(node) {
                    started += 1;
                }
            }
        }
        started
    }

    fn consider(self: &Arc<Self>, node: NodeId) -> bool {
        if self.state.lock().registry.is_seen(node) {
            return false;
        }
        let (text_node, text) = self.extract_text(node);
        if text.chars().count() <= self.config.min_text_length {
            return false;
        }

        let (id, endpoint) = {
            let mut state = self.state.lock();
            if !state.enabled {
                tracing::trace!(target: "watcher", node = %node, "analysis paused; node left unseen");
                return false;
            }
            let Some(id) = state.registry.admit(node, text_node) else {
                return false;
            };
            let pending = self.render(id, node, &Indicator::Analyzing);
            if let Some(record) = state.registry.get_mut(id) {
                record.pending_indicator = pending;
            }
            (id, state.backend_url.clone())
        };

        tracing::debug!(target: "watcher", candidate = %id, node = %node, chars = text.chars().count(), "analysis started");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.classifier.score(&endpoint, &text).await;
            this.complete(id, outcome);
        });
        true
    }

    fn extract_text(&self, node: NodeId) -> (Option<NodeId>, String) {
        let text_node = if self.document.matches(node, &self.canonical_text) {
            Some(node)
        } else {
            self.document.query_descendant(node, &self.canonical_text)
        };
        let text = text_node
            .map(|t| self.document.text_content(t).trim().to_string())
            .unwrap_or_default();
        (text_node, text)
    }

    fn complete(&self, id: CandidateId, outcome: Result<AnalysisResult, ClassifierError>) {
        let result = {
            let mut state = self.state.lock();
            let Some(record) = state.registry.get_mut(id) else {
                return;
            };
            if let Some(pending) = record.pending_indicator.take() {
                self.document.remove(pending);
            }
            let node = record.node;

            match outcome {
                Ok(result) => {
                    if let Err(err) = record.state.annotate(result.clone()) {
                        tracing::warn!(target: "watcher", candidate = %id, error = %err, "result dropped");
                        return;
                    }
                    let badge = ResultBadge::from_result(&result);
                    self.render(id, node, &Indicator::Result(badge));
                    tracing::debug!(
                        target: "watcher",
                        candidate = %id,
                        label = result.label.as_str(),
                        score = result.score,
                        "annotated"
                    );
                    result
                }
                Err(err) => {
                    let reason = err.to_string();
                    if let Err(transition) = record.state.fail(reason.clone()) {
                        tracing::warn!(target: "watcher", candidate = %id, error = %transition, "failure dropped");
                        return;
                    }
                    self.render(id, node, &Indicator::Error);
                    tracing::warn!(target: "watcher", candidate = %id, error = %reason, "analysis failed");
                    return;
                }
            }
        };

        self.report(Target::Coordinator, Message::IncrementAnalyzed);
        if result.label.is_toxic() {
            self.report(Target::Coordinator, Message::IncrementToxic);
            self.report(
                Target::Panel,
                Message::AddActivity {
                    text: format!("Toxic content detected ({:.1}%)", result.score * 100.0),
                    kind: ActivityKind::Warning,
                },
            );
        }
    }

    fn report(&self, target: Target, message: Message) {
        if let Err(err) = self.bus.notify(target, message) {
            tracing::debug!(target: "watcher", tab = %self.tab, error = %err, "report not delivered");
        }
    }

    fn render(&self, id: CandidateId, node: NodeId, indicator: &Indicator) -> Option<NodeId> {
        let container = self
            .document
            .closest(node, &self.container)
            .or_else(|| self.document.parent(node))?;
        self.document
            .append(container, &indicator.to_element(&id.to_string()))
            .map(|tree| tree.root)
    }

    pub fn handle_message(&self, message: Message) -> Reply {
        match message {
            Message::ToggleAnalysis { enabled } => self.toggle_enabled(enabled),
            Message::UpdateBackendUrl { url } => {
                tracing::info!(target: "watcher", tab = %self.tab, url = %url, "backend url updated");
                self.state.lock().backend_url = url;
            }
            Message::GetStats => {
                let stats = self.local_stats();
                self.report(Target::Coordinator, Message::UpdateStats { stats: stats.into() });
            }
            Message::StatsUpdated { stats } => {
                self.state.lock().last_broadcast = Some(stats);
            }
            other => {
                tracing::debug!(target: "watcher", action = other.action(), "ignored message");
            }
        }
        Reply::ack()
    }

    pub fn toggle_enabled(&self, enabled: bool) {
        let (text_node, toggle_node) = {
            let mut state = self.state.lock();
            state.enabled = enabled;
            (state.status_text, state.status_toggle)
        };
        if let Some(node) = text_node {
            self.document.set_text(node, status_text(enabled));
        }
        if let Some(node) = toggle_node {
            self.document.set_text(node, toggle_glyph(enabled));
        }
        tracing::info!(target: "watcher", tab = %self.tab, enabled, "analysis toggled");
    }

    pub fn press_toggle(&self) {
        let enabled = !self.is_enabled();
        self.toggle_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn local_stats(&self) -> Stats {
        self.state.lock().registry.local_stats()
    }

    pub fn last_broadcast(&self) -> Option<Stats> {
        self.state.lock().last_broadcast
    }

    pub fn state_of(&self, node: NodeId) -> AnnotationState {
        self.state.lock().registry.state_of(node)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().registry.pending()
    }

    pub fn status_line(&self) -> Option<String> {
        let node = self.state.lock().status_text?;
        Some(self.document.text_content(node))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        document::ElementSpec,
        domain::Label,
        infrastructure::shutdown::Shutdown,
        testing::{eventually, tweet, FakeClassifier, Verdict},
    };

    use crate::config::DEFAULT_BACKEND_URL as DEFAULT_URL;
    const LONG_TEXT: &str = "this post is long enough to be scored by the analyzer";

    struct Harness {
        bus: MessageBus,
        doc: Document,
        classifier: Arc<FakeClassifier>,
        watcher: Arc<DocumentWatcher>,
        coordinator: Inbox,
        shutdown: Shutdown,
    }

    impl Harness {
        fn coordinator_actions(&mut self) -> Vec<&'static str> {
            let mut actions = Vec::new();
            while let Ok(envelope) = self.coordinator.try_recv() {
                actions.push(envelope.message.action());
            }
            actions
        }

        fn texts_of(&self, selector: &str) -> Vec<String> {
            let selector: Selector = selector.parse().unwrap();
            self.doc
                .query_all(self.doc.root(), &selector)
                .into_iter()
                .map(|node| self.doc.text_content(node))
                .collect()
        }

        fn count(&self, selector: &str) -> usize {
            let selector: Selector = selector.parse().unwrap();
            self.doc.query_all(self.doc.root(), &selector).len()
        }
    }

    async fn harness(verdict: Verdict, settle_delay: Duration) -> Harness {
        let bus = MessageBus::new();
        let tab = bus.open_tab("https://x.com/home");
        let doc = Document::new();
        let classifier = Arc::new(FakeClassifier::new(verdict));
        let config = WatcherConfig {
            settle_delay,
            ..WatcherConfig::default()
        };
        let watcher = DocumentWatcher::new(
            tab,
            doc.clone(),
            classifier.clone(),
            bus.clone(),
            config,
            DEFAULT_URL,
        );
        let (shutdown, _) = Shutdown::new();
        // no coordinator yet: settings fall back to the defaults
        Arc::clone(&watcher)
            .attach(shutdown.subscribe())
            .await
            .unwrap();
        let coordinator = bus.register_coordinator();
        Harness {
            bus,
            doc,
            classifier,
            watcher,
            coordinator,
            shutdown,
        }
    }

    #[tokio::test]
    async fn toxic_verdict_renders_badge_and_reports() {
        let mut h = harness(Verdict::Score(Label::Toxic, 0.85), Duration::ZERO).await;
        let mut panel = h.bus.attach_panel();

        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| matches!(h.watcher.state_of(article), AnnotationState::Annotated(_))).await;

        assert_eq!(h.texts_of(".result-label"), vec!["TOXIC"]);
        assert_eq!(h.texts_of(".result-score"), vec!["85.0%"]);
        assert_eq!(h.count(".high-toxic"), 1);
        assert_eq!(h.count(".analyzing"), 0);
        let fill: Selector = ".toxicity-fill".parse().unwrap();
        let fill = h.doc.query_all(article, &fill)[0];
        assert_eq!(h.doc.attr(fill, "style").as_deref(), Some("width: 85%"));

        // the nested text block belongs to the post and is not scored again
        assert_eq!(h.classifier.call_count(), 1);
        assert_eq!(h.classifier.calls()[0], (DEFAULT_URL.to_string(), LONG_TEXT.to_string()));

        eventually(|| !h.coordinator.is_empty()).await;
        tokio::task::yield_now().await;
        assert_eq!(
            h.coordinator_actions(),
            vec!["incrementAnalyzed", "incrementToxic"]
        );
        let activity = panel.recv().await.unwrap();
        assert!(matches!(
            activity.message,
            Message::AddActivity { kind: ActivityKind::Warning, .. }
        ));
        h.shutdown.trigger("test");
    }

    #[tokio::test]
    async fn transport_failure_shows_error_without_increments() {
        let mut h = harness(Verdict::TransportError, Duration::ZERO).await;

        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| matches!(h.watcher.state_of(article), AnnotationState::Failed(_))).await;

        assert_eq!(h.count(".analyzing"), 0);
        assert_eq!(h.count(".error"), 1);
        assert_eq!(h.count(".content-analyzer-result"), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.coordinator_actions().is_empty());
        assert_eq!(h.watcher.local_stats().total_analyzed, 1);
        assert_eq!(h.watcher.local_stats().toxic_count, 0);
    }

    async fn fails_without_increments(verdict: Verdict) {
        let mut h = harness(verdict, Duration::ZERO).await;

        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| matches!(h.watcher.state_of(article), AnnotationState::Failed(_))).await;

        assert_eq!(h.count(".analyzing"), 0);
        assert_eq!(h.count(".error"), 1);
        assert_eq!(h.texts_of(".error"), vec!["❌ Error"]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.coordinator_actions().is_empty());
        assert_eq!(h.classifier.call_count(), 1);
    }

    #[tokio::test]
    async fn error_status_marks_candidate_failed() {
        fails_without_increments(Verdict::BadStatus(503)).await;
    }

    #[tokio::test]
    async fn unparseable_response_marks_candidate_failed() {
        fails_without_increments(Verdict::Malformed).await;
    }

    #[tokio::test]
    async fn repeated_batches_score_a_node_once() {
        let h = harness(Verdict::Score(Label::Safe, 0.1), Duration::ZERO).await;

        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| h.watcher.state_of(article).is_terminal()).await;

        let holder = h
            .doc
            .append(h.doc.root(), &ElementSpec::new("section"))
            .unwrap()
            .root;
        assert!(h.doc.move_to(article, holder));
        h.watcher.on_mutation(&MutationBatch {
            added: vec![article],
            removed: Vec::new(),
        });

        let second = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| h.watcher.state_of(second).is_terminal()).await;
        assert_eq!(h.classifier.call_count(), 2);
        assert_eq!(h.count(".content-analyzer-result"), 2);
    }

    #[tokio::test]
    async fn short_text_is_ignored() {
        let h = harness(Verdict::Score(Label::Safe, 0.1), Duration::ZERO).await;

        let short = h.doc.append(h.doc.root(), &tweet("ten chars!")).unwrap().root;
        let longer = h.doc.append(h.doc.root(), &tweet("eleven char")).unwrap().root;
        eventually(|| h.watcher.state_of(longer).is_terminal()).await;

        assert_eq!(h.watcher.state_of(short), AnnotationState::Unseen);
        assert_eq!(h.classifier.call_count(), 1);
    }

    #[tokio::test]
    async fn paused_watcher_leaves_nodes_unseen() {
        let h = harness(Verdict::Score(Label::Safe, 0.2), Duration::ZERO).await;
        let reply = h
            .bus
            .request(Target::Tab(h.watcher.tab()), Message::ToggleAnalysis { enabled: false })
            .await
            .unwrap();
        assert!(reply.is_success());
        assert_eq!(h.watcher.status_line().as_deref(), Some("Content Analyzer Paused"));

        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.classifier.call_count(), 0);
        assert_eq!(h.watcher.state_of(article), AnnotationState::Unseen);

        h.watcher.press_toggle();
        assert_eq!(h.watcher.status_line().as_deref(), Some("Content Analyzer Active"));
        let holder = h
            .doc
            .append(h.doc.root(), &ElementSpec::new("section"))
            .unwrap()
            .root;
        h.doc.move_to(article, holder);
        eventually(|| h.watcher.state_of(article).is_terminal()).await;
        assert_eq!(h.classifier.call_count(), 1);
    }

    #[tokio::test]
    async fn page_messages_update_url_and_push_stats() {
        let mut h = harness(Verdict::Score(Label::Toxic, 0.5), Duration::ZERO).await;
        let tab = h.watcher.tab();

        h.bus
            .request(
                Target::Tab(tab),
                Message::UpdateBackendUrl {
                    url: "https://example.test/analyze".into(),
                },
            )
            .await
            .unwrap();
        let article = h.doc.append(h.doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        eventually(|| h.watcher.state_of(article).is_terminal()).await;
        assert_eq!(h.classifier.calls()[0].0, "https://example.test/analyze");

        eventually(|| !h.coordinator.is_empty()).await;
        tokio::task::yield_now().await;
        let _ = h.coordinator_actions();

        h.bus
            .request(Target::Tab(tab), Message::GetStats)
            .await
            .unwrap();
        let envelope = h.coordinator.recv().await.unwrap();
        match envelope.message {
            Message::UpdateStats { stats } => {
                assert_eq!(stats.total_analyzed, Some(1));
                assert_eq!(stats.toxic_count, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }

        let stats = Stats {
            total_analyzed: 9,
            toxic_count: 4,
        };
        h.bus
            .request(Target::Tab(tab), Message::StatsUpdated { stats })
            .await
            .unwrap();
        assert_eq!(h.watcher.last_broadcast(), Some(stats));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_posts_are_scanned_after_settle_delay() {
        let bus = MessageBus::new();
        let tab = bus.open_tab("https://twitter.com/home");
        let doc = Document::new();
        let article = doc.append(doc.root(), &tweet(LONG_TEXT)).unwrap().root;
        let classifier = Arc::new(FakeClassifier::new(Verdict::Score(Label::Safe, 0.1)));
        let watcher = DocumentWatcher::new(
            tab,
            doc,
            classifier.clone(),
            bus,
            WatcherConfig::default(),
            DEFAULT_URL,
        );
        let (shutdown, listener) = Shutdown::new();
        let handle = Arc::clone(&watcher).attach(listener).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(classifier.call_count(), 0);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        eventually(|| watcher.state_of(article).is_terminal()).await;
        assert_eq!(classifier.call_count(), 1);

        shutdown.trigger("test");
        handle.await.unwrap();
    }
}
