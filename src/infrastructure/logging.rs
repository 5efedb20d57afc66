use std::io;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::AppConfig, infrastructure::directories::ResolvedPaths};

const LOG_FILE: &str = "analyzer.log";
const FALLBACK_DIRECTIVE: &str = "info";

static INIT: OnceCell<()> = OnceCell::new();
static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE))
}

pub fn init_tracing(config: &AppConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let (file_writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(&paths.logs_dir, LOG_FILE));
        let _ = FILE_GUARD.set(guard);

        tracing_subscriber::registry()
            .with(build_filter(&config.logging.level))
            .with(fmt::layer().with_writer(io::stdout).with_target(true))
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init()?;

        tracing::info!(
            target: "lifecycle",
            file = %paths.logs_dir.join(LOG_FILE).display(),
            level = %config.logging.level,
            "tracing initialized"
        );
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_level_falls_back() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(build_filter("watcher=debug").to_string(), "watcher=debug");
        assert_eq!(build_filter("watcher=loud").to_string(), FALLBACK_DIRECTIVE);
    }
}
