use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use reqwest::Client;
use tokio::{
    fs::File,
    io::{AsyncBufRead, BufReader},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    classifier::{Classifier, HttpClassifier},
    config::AppConfig,
    coordinator::Coordinator,
    db::{self, KeyValueStore, SqliteKvStore, StoreReader},
    domain::Settings,
    infrastructure::{
        directories::ResolvedPaths, instance_guard::InstanceGuard, shutdown::Shutdown,
    },
    messaging::MessageBus,
    session::{SessionContext, SessionReplayer},
};

pub struct ContentAnalyzerApp {
    _paths: ResolvedPaths,
    _guard: Option<InstanceGuard>,
    config: Arc<AppConfig>,
    store: SqliteKvStore,
    bus: MessageBus,
    coordinator: Arc<Coordinator>,
    coordinator_handle: JoinHandle<()>,
    classifier: Arc<dyn Classifier>,
    shutdown: Shutdown,
}

impl ContentAnalyzerApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let guard = InstanceGuard::acquire(&paths)?;
        let pool = db::init_pool(&paths.db_path)
            .await
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        let store = SqliteKvStore::new(pool);

        let http_client = Client::builder()
            .user_agent(format!("content-analyzer-rust/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(http_client));

        let bus = MessageBus::new();
        let coordinator = Coordinator::initialize(
            Arc::new(store.clone()),
            bus.clone(),
            config.sites.clone(),
            Settings::with_backend(config.classifier.default_backend_url.clone()),
        )
        .await;
        let coordinator_handle = Arc::clone(&coordinator).spawn(shutdown.subscribe());
        if let Some(reason) = coordinator.run_install_check().await {
            tracing::debug!(target: "lifecycle", ?reason, "install check complete");
        }

        Ok(Self {
            _paths: paths,
            _guard: guard,
            config,
            store,
            bus,
            coordinator,
            coordinator_handle,
            classifier,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let ContentAnalyzerApp {
            _paths: _,
            _guard,
            config,
            store,
            bus,
            coordinator,
            mut coordinator_handle,
            classifier,
            shutdown,
        } = self;

        tracing::info!(
            target: "lifecycle",
            version = env!("CARGO_PKG_VERSION"),
            "content analyzer started"
        );

        match config.session.feed_path.as_deref() {
            Some(path) => {
                let feed = open_feed(path).await?;
                let reader: Arc<dyn KeyValueStore> = Arc::new(store.clone());
                let ctx = SessionContext {
                    bus,
                    coordinator,
                    classifier,
                    store: StoreReader::new(reader),
                    sites: config.sites.clone(),
                    watcher: config.watcher.clone(),
                    default_backend_url: config.classifier.default_backend_url.clone(),
                    timezone: config.timezone.parse::<Tz>().unwrap_or(Tz::UTC),
                };
                tracing::info!(target: "session", feed = path, "replaying session feed");
                let summary = SessionReplayer::new(ctx)
                    .run(feed, shutdown.subscribe())
                    .await;
                for page in &summary.pages {
                    tracing::info!(
                        target: "session",
                        page = %page.page,
                        url = %page.url,
                        watched = page.watched,
                        analyzed = page.stats.total_analyzed,
                        toxic = page.stats.toxic_count,
                        "page summary"
                    );
                }
                shutdown.trigger("session feed finished");
            }
            None => {
                tracing::info!(target: "lifecycle", "no session feed configured; waiting for shutdown");
                shutdown.subscribe().notified().await;
            }
        }

        let shutdown_timeout = Duration::from_secs(5);
        let coordinator_sleep = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(coordinator_sleep);
        tokio::select! {
            res = &mut coordinator_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "coordinator", "coordinator task panicked");
                    }
                }
            }
            _ = &mut coordinator_sleep => {
                tracing::warn!(
                    target: "coordinator",
                    "coordinator did not stop within {:?}; aborting",
                    shutdown_timeout
                );
                coordinator_handle.abort();
            }
        }

        if timeout(shutdown_timeout, store.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "store did not close within {:?}",
                shutdown_timeout
            );
        }

        tracing::info!(target: "lifecycle", "content analyzer stopped");
        Ok(())
    }
}

async fn open_feed(path: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open session feed {path}"))?;
    Ok(Box::new(BufReader::new(file)))
}
