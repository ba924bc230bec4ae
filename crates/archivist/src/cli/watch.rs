//! Drop-folder polling.
//!
//! An archive file or folder appearing in the watched directory is queued
//! once its size has been the same for two consecutive polls. Each entry is
//! queued at most once per run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use archivist_core::archive::is_archive_path;
use archivist_core::workspace::ContentStats;
use archivist_core::WorkQueue;
use tokio_util::sync::CancellationToken;

/// Options for `--watch`.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub dir: PathBuf,
    pub interval: Duration,
}

/// Settle tracking across polls.
#[derive(Debug, Default)]
pub struct WatchState {
    /// Last observed size of entries that have not settled yet
    sizes: HashMap<PathBuf, u64>,
    queued: HashSet<PathBuf>,
    /// Directories never picked up (output and scratch dirs)
    ignored: HashSet<PathBuf>,
}

impl WatchState {
    pub fn new(ignored: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            ignored: ignored.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Feed one poll's `(path, size)` observations; returns entries that settled.
    pub fn observe(&mut self, entries: Vec<(PathBuf, u64)>) -> Vec<PathBuf> {
        let mut settled = Vec::new();
        let mut present = HashSet::new();

        for (path, size) in entries {
            if self.queued.contains(&path) || self.ignored.contains(&path) {
                continue;
            }
            present.insert(path.clone());
            if self.sizes.insert(path.clone(), size) == Some(size) {
                self.sizes.remove(&path);
                self.queued.insert(path.clone());
                settled.push(path);
            }
        }

        // Forget entries that vanished before settling
        self.sizes.retain(|path, _| present.contains(path));
        settled
    }
}

/// Candidate entries directly under `dir`, sorted by name.
pub fn scan(dir: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            entries.push((path.clone(), ContentStats::collect(&path).total_bytes));
        } else if file_type.is_file() && is_archive_path(&path) {
            let size = entry.metadata().map(|m| m.len()).unwrap_or_default();
            entries.push((path, size));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Poll `options.dir` until `cancel` fires, pushing settled entries into `queue`.
///
/// Closes the queue on the way out.
pub async fn watch(
    options: WatchOptions,
    ignored: Vec<PathBuf>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    tracing::info!(
        "Watching {:?} every {}s",
        options.dir,
        options.interval.as_secs()
    );
    let mut state = WatchState::new(ignored);
    let mut ticker = tokio::time::interval(options.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let dir = options.dir.clone();
        let entries = match tokio::task::spawn_blocking(move || scan(&dir)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                tracing::warn!("Cannot read {:?}: {e}", options.dir);
                continue;
            }
            Err(e) => {
                tracing::error!("Watch scan task failed: {e}");
                continue;
            }
        };

        for path in state.observe(entries) {
            let id = queue.push(&path);
            tracing::info!("Queued #{id} from drop folder: {:?}", path);
        }
    }

    queue.close();
}
