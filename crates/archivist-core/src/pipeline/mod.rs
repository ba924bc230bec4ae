//! Work-item pipeline.
//!
//! - **queue**: FIFO of pending items plus the per-item status map
//! - **processor**: the per-item state machine and the run loop
//!
//! Each item moves `Queued → Extracting → Converting → Packaging →
//! Uploading → Done`, or to `Failed` from whichever stage raised the error.

pub mod processor;
pub mod queue;

pub use processor::{Pipeline, StageFailure};
pub use queue::{ItemSummary, RunSummary, WorkQueue};

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive::{archive_stem, OutputArchive};
use crate::naming::clean_name;
use crate::remote::SubmissionRecord;
use crate::workspace::ContentStats;

/// Position of a work item in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Queued,
    Extracting,
    Converting,
    Packaging,
    Uploading,
    Done,
    Failed,
}

impl Stage {
    /// Progress estimate reported with this stage.
    pub fn percent(self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::Extracting => 10,
            Stage::Converting => 35,
            Stage::Packaging => 65,
            Stage::Uploading => 85,
            Stage::Done | Stage::Failed => 100,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Extracting => "extracting",
            Stage::Converting => "converting",
            Stage::Packaging => "packaging",
            Stage::Uploading => "uploading",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued input.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: u64,
    pub source: PathBuf,
    /// Cleaned name used for titles, sidecar folders and logs
    pub display_name: String,
    pub is_dir: bool,
    pub stage: Stage,
}

impl WorkItem {
    pub fn new(id: u64, source: PathBuf) -> Self {
        let is_dir = source.is_dir();
        let raw = if is_dir {
            source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            archive_stem(&source)
        };
        Self {
            id,
            display_name: clean_name(&raw),
            source,
            is_dir,
            stage: Stage::Queued,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Sent to the presentation layer after every state transition.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub item_id: u64,
    pub display_name: String,
    pub stage: Stage,
    pub percent: u8,
    /// Failure reason, set only for `Failed`
    pub message: Option<String>,
}

/// What a finished item produced.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub title: String,
    pub output: OutputArchive,
    pub stats: ContentStats,
    pub converted: usize,
    pub conversion_failures: usize,
    /// Present when the Uploading stage ran
    pub submission: Option<SubmissionRecord>,
}

/// Current or terminal status of an item.
#[derive(Debug, Clone)]
pub enum ItemStatus {
    Pending,
    Running(Stage),
    Done(Box<ItemReport>),
    Failed { stage: Stage, reason: String },
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done(_) | ItemStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_percentages() {
        let stages = [
            Stage::Queued,
            Stage::Extracting,
            Stage::Converting,
            Stage::Packaging,
            Stage::Uploading,
            Stage::Done,
        ];
        let percents: Vec<u8> = stages.iter().map(|s| s.percent()).collect();
        assert_eq!(percents, vec![0, 10, 35, 65, 85, 100]);
        assert_eq!(Stage::Failed.percent(), 100);
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Uploading.is_terminal());
    }

    #[test]
    fn test_work_item_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("03_Weekend Trip [HD]");
        std::fs::create_dir_all(&folder).unwrap();

        let item = WorkItem::new(1, folder);
        assert!(item.is_dir);
        assert_eq!(item.display_name, "Weekend Trip");

        let item = WorkItem::new(2, PathBuf::from("/drop/Beach 30P 200MB.7z.zst"));
        assert!(!item.is_dir);
        assert_eq!(item.display_name, "Beach");
        assert_eq!(item.stage, Stage::Queued);
    }
}
