//! FIFO of pending work items and the per-item status map.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{ItemStatus, Stage, WorkItem};

struct Tracked {
    display_name: String,
    source: PathBuf,
    status: ItemStatus,
}

/// Queue shared between the presentation layer (producer) and the
/// orchestrator (single consumer).
pub struct WorkQueue {
    pending: Mutex<VecDeque<WorkItem>>,
    statuses: Mutex<BTreeMap<u64, Tracked>>,
    notify: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue `source` and return the new item's id.
    pub fn push(&self, source: impl Into<PathBuf>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let item = WorkItem::new(id, source.into());
        tracing::debug!("Queued #{id}: {:?} as {:?}", item.source, item.display_name);

        lock(&self.statuses).insert(
            id,
            Tracked {
                display_name: item.display_name.clone(),
                source: item.source.clone(),
                status: ItemStatus::Pending,
            },
        );
        lock(&self.pending).push_back(item);
        self.notify.notify_one();
        id
    }

    /// No more items will be pushed; `next` returns `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Items still waiting to be pulled.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Items ever pushed.
    pub fn total(&self) -> usize {
        lock(&self.statuses).len()
    }

    /// Wait for the next item.
    ///
    /// Returns `None` when the queue is closed and drained, or when `cancel`
    /// fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<WorkItem> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = lock(&self.pending).pop_front();
            if let Some(item) = popped {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn set_status(&self, id: u64, status: ItemStatus) {
        if let Some(tracked) = lock(&self.statuses).get_mut(&id) {
            tracked.status = status;
        }
    }

    pub fn status(&self, id: u64) -> Option<ItemStatus> {
        lock(&self.statuses).get(&id).map(|t| t.status.clone())
    }

    /// Snapshot of every item pushed so far, in id order.
    pub fn summary(&self) -> RunSummary {
        let items = lock(&self.statuses)
            .iter()
            .map(|(id, tracked)| ItemSummary {
                id: *id,
                display_name: tracked.display_name.clone(),
                source: tracked.source.clone(),
                status: tracked.status.clone(),
            })
            .collect();
        RunSummary { items }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Final status of one item.
#[derive(Debug, Clone)]
pub struct ItemSummary {
    pub id: u64,
    pub display_name: String,
    pub source: PathBuf,
    pub status: ItemStatus,
}

impl ItemSummary {
    /// Stage and reason when the item failed.
    pub fn failure(&self) -> Option<(Stage, &str)> {
        match &self.status {
            ItemStatus::Failed { stage, reason } => Some((*stage, reason.as_str())),
            _ => None,
        }
    }
}

/// Per-item outcomes of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub items: Vec<ItemSummary>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Done(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed { .. }))
            .count()
    }

    /// Items that never reached a terminal state (cancelled runs).
    pub fn unfinished(&self) -> usize {
        self.items.iter().filter(|i| !i.status.is_terminal()).count()
    }
}
