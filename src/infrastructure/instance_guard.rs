use std::{
    env,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process, thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::infrastructure::directories::ResolvedPaths;

const LOCK_FILENAME: &str = ".coordinator.lock";
const WAIT_INTERVAL: Duration = Duration::from_millis(250);
const MAX_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

impl InstanceGuard {
    pub fn acquire(paths: &ResolvedPaths) -> Result<Option<Self>> {
        if skip_guard() {
            tracing::warn!(
                target: "lifecycle",
                "runtime lock skipped because SKIP_PROCESS_GUARD is set"
            );
            return Ok(None);
        }
        Self::acquire_at(&paths.data_dir.join(LOCK_FILENAME), MAX_WAIT).map(Some)
    }

    fn acquire_at(lock_path: &Path, max_wait: Duration) -> Result<Self> {
        let start = Instant::now();
        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(lock_path)
                .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    write_lock_info(&mut file)?;
                    tracing::info!(
                        target: "lifecycle",
                        pid = process::id(),
                        path = %lock_path.display(),
                        "acquired coordinator lock"
                    );
                    return Ok(Self {
                        file,
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }

            if start.elapsed() >= max_wait {
                let holder = read_lock_info(lock_path)
                    .map(|info| info.pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(anyhow!(
                    "another coordinator (pid {holder}) holds {}",
                    lock_path.display()
                ));
            }
            drop(file);
            thread::sleep(WAIT_INTERVAL);
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    target: "lifecycle",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove lock file"
                );
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: i64,
}

fn write_lock_info(file: &mut File) -> Result<()> {
    let info = LockInfo {
        pid: process::id(),
        started_at: Utc::now().timestamp_millis(),
    };
    let payload = serde_json::to_vec(&info)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&payload)?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_info(lock_path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn skip_guard() -> bool {
    env::var("SKIP_PROCESS_GUARD")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
