//! Keep/discard decisions after a conversion batch.

use std::path::Path;

use super::ImageConversionRecord;
use crate::error::{PipelineError, PipelineResult};

/// What the retention step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSummary {
    /// Converted files copied into the sidecar folder
    pub copied: usize,
    pub originals_removed: usize,
    pub converted_removed: usize,
}

/// Apply the retention decisions of `records`.
///
/// When `sidecar` is given, every converted file is copied there first
/// (keeping its path relative to `root`), so discarding converted files in
/// the working tree never empties the sidecar.
pub fn apply_retention(
    records: &[ImageConversionRecord],
    root: &Path,
    sidecar: Option<&Path>,
) -> PipelineResult<RetentionSummary> {
    let mut summary = RetentionSummary::default();

    if let Some(sidecar) = sidecar {
        for record in records {
            let relative = record
                .converted
                .strip_prefix(root)
                .ok()
                .map(Path::to_path_buf)
                .or_else(|| record.converted.file_name().map(Into::into))
                .ok_or_else(|| PipelineError::workspace(&record.converted, "converted file has no name"))?;
            let target = sidecar.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PipelineError::workspace(parent, e))?;
            }
            std::fs::copy(&record.converted, &target)
                .map_err(|e| PipelineError::workspace(&target, e))?;
            summary.copied += 1;
        }
        tracing::info!("Saved {} converted images to {:?}", summary.copied, sidecar);
    }

    for record in records {
        if !record.keep_original && record.original != record.converted {
            remove(&record.original)?;
            summary.originals_removed += 1;
        }
        if !record.keep_converted {
            remove(&record.converted)?;
            summary.converted_removed += 1;
        }
    }

    Ok(summary)
}

fn remove(path: &Path) -> PipelineResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::workspace(path, e)),
    }
}
