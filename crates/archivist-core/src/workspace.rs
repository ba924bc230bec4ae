//! Working-tree preparation: flattening, junk removal, sequential renaming
//! and content statistics.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::NamingConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::naming::natural_sort_key;

/// Extensions counted (and renamed) as images.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "avif", "bmp", "tiff", "gif", "heic", "heif",
];

/// Extensions counted (and renamed) as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv", "3gp", "m4v"];

const JUNK_EXTENSIONS: &[&str] = &["html", "htm", "txt", "url", "lnk", "nfo", "diz"];
const JUNK_NAMES: &[&str] = &["thumbs.db", ".ds_store"];
const JUNK_PREFIX: &str = "ewm";

const FLATTEN_STAGING: &str = ".archivist-flatten";

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

pub fn is_image(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

pub fn is_video(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

/// Image, video and byte counts of a working tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentStats {
    pub image_count: usize,
    pub video_count: usize,
    pub total_bytes: u64,
}

impl ContentStats {
    /// Walk `root` and count everything in it.
    pub fn collect(root: &Path) -> Self {
        let mut stats = Self::default();
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Ok(meta) = entry.metadata() {
                stats.total_bytes += meta.len();
            }
            if is_image(entry.path()) {
                stats.image_count += 1;
            } else if is_video(entry.path()) {
                stats.video_count += 1;
            }
        }
        stats
    }

    /// Total size in whole megabytes, rounded down.
    pub fn total_mb(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

/// What [`prepare`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepSummary {
    pub flattened: bool,
    pub junk_removed: usize,
    pub renamed: usize,
}

/// Flatten, remove junk and (optionally) rename media under `root`.
pub fn prepare(root: &Path, naming: &NamingConfig) -> PipelineResult<PrepSummary> {
    let flattened = flatten_single_root(root)?;
    let junk_removed = remove_junk(root)?;
    let renamed = if naming.rename_files {
        rename_media(root, &naming.image_prefix, &naming.video_prefix)?
    } else {
        0
    };

    tracing::debug!(
        "Prepared {:?}: flattened={flattened}, junk={junk_removed}, renamed={renamed}",
        root
    );
    Ok(PrepSummary {
        flattened,
        junk_removed,
        renamed,
    })
}

/// Lift the contents of a lone top-level directory into `root`.
pub fn flatten_single_root(root: &Path) -> PipelineResult<bool> {
    let entries = list_dir(root)?;
    let [only] = entries.as_slice() else {
        return Ok(false);
    };
    if !only.is_dir() {
        return Ok(false);
    }

    // The wrapper may contain an entry with its own name.
    let staging = root.join(FLATTEN_STAGING);
    std::fs::rename(only, &staging).map_err(|e| PipelineError::workspace(only, e))?;
    for child in list_dir(&staging)? {
        let Some(name) = child.file_name() else { continue };
        let target = root.join(name);
        std::fs::rename(&child, &target).map_err(|e| PipelineError::workspace(&child, e))?;
    }
    std::fs::remove_dir(&staging).map_err(|e| PipelineError::workspace(&staging, e))?;
    Ok(true)
}

fn is_junk(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    JUNK_NAMES.contains(&name.as_str())
        || name.starts_with(JUNK_PREFIX)
        || extension_of(path).is_some_and(|e| JUNK_EXTENSIONS.contains(&e.as_str()))
}

/// Delete link files, readmes, thumbnails caches and QR-code images.
pub fn remove_junk(root: &Path) -> PipelineResult<usize> {
    let junk: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_junk(e.path()))
        .map(|e| e.into_path())
        .collect();

    for path in &junk {
        std::fs::remove_file(path).map_err(|e| PipelineError::workspace(path, e))?;
        tracing::trace!("Removed junk file {:?}", path);
    }
    Ok(junk.len())
}

/// Rename images and videos to `<prefix>NNN.<ext>` in natural order.
///
/// Numbering runs across the whole tree; files stay in their directory.
pub fn rename_media(root: &Path, image_prefix: &str, video_prefix: &str) -> PipelineResult<usize> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort_by_cached_key(|p| natural_sort_key(&p.to_string_lossy()));

    let mut image_no = 0usize;
    let mut video_no = 0usize;
    let mut plan: Vec<(PathBuf, PathBuf)> = Vec::new();

    for path in files {
        let Some(ext) = extension_of(&path) else { continue };
        let new_name = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            image_no += 1;
            format!("{image_prefix}{image_no:03}.{ext}")
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            video_no += 1;
            format!("{video_prefix}{video_no:03}.{ext}")
        } else {
            continue;
        };
        let target = path.with_file_name(new_name);
        if target != path {
            plan.push((path, target));
        }
    }

    // Two phases so a target never clobbers a file that has not moved yet.
    let mut staged = Vec::with_capacity(plan.len());
    for (i, (from, to)) in plan.into_iter().enumerate() {
        let temp = from.with_file_name(format!(".archivist-rename-{i}"));
        std::fs::rename(&from, &temp).map_err(|e| PipelineError::workspace(&from, e))?;
        staged.push((temp, to));
    }
    for (temp, to) in &staged {
        std::fs::rename(temp, to).map_err(|e| PipelineError::workspace(to, e))?;
    }
    Ok(staged.len())
}

/// Recursively copy `src` into `dst` (created if missing).
pub fn copy_dir(src: &Path, dst: &Path) -> PipelineResult<u64> {
    let mut copied = 0u64;
    for entry in WalkDir::new(src).into_iter() {
        let entry = entry.map_err(|e| PipelineError::workspace(src, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PipelineError::workspace(entry.path(), e))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| PipelineError::workspace(&target, e))?;
        } else if entry.file_type().is_file() {
            copied += std::fs::copy(entry.path(), &target)
                .map_err(|e| PipelineError::workspace(&target, e))?;
        }
    }
    Ok(copied)
}

fn list_dir(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::workspace(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::workspace(dir, e))?;
        paths.push(entry.path());
    }
    Ok(paths)
}
