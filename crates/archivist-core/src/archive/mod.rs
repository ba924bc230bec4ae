//! Archive extraction and packaging.
//!
//! The [`Archiver`] trait is the seam between the orchestrator and the
//! external archiver binary. [`SevenZip`] drives a 7-Zip class tool; tests
//! substitute in-memory fakes.

mod candidates;
mod sevenzip;

pub use candidates::{mask_password, try_candidates, AttemptError, PasswordCandidates, TryOutcome};
pub use sevenzip::SevenZip;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

/// Extensions recognized as incoming archives.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["7z", "zip", "rar", "tar", "gz", "bz2", "zst"];

/// Output archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    SevenZ,
    Zip,
    /// 7z container compressed with zstd
    Zst,
}

impl ArchiveFormat {
    /// File extension without the leading dot. `Zst` is compound.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Zst => "7z.zst",
        }
    }

    /// Value passed to the archiver's `-t` switch.
    pub(crate) fn archiver_type(self) -> &'static str {
        match self {
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Zst => "zstd",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "7z" => Ok(ArchiveFormat::SevenZ),
            "zip" => Ok(ArchiveFormat::Zip),
            "zst" | "7z.zst" => Ok(ArchiveFormat::Zst),
            other => Err(PipelineError::UnsupportedFormat {
                path: PathBuf::from("archive.format"),
                format: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Output file name for a display name: the extension is appended whole,
/// so dotted names keep their tail.
pub fn output_file_name(display_name: &str, format: ArchiveFormat) -> String {
    format!("{display_name}.{}", format.extension())
}

/// First free output path in `dir` for `display_name`.
///
/// An existing archive is never replaced: later names get a ` (2)`, ` (3)`
/// ... suffix ahead of the extension. For `.7z.zst` the intermediate `.7z`
/// must be free as well.
pub fn unique_output_path(dir: &Path, display_name: &str, format: ArchiveFormat) -> PathBuf {
    let occupied = |name: &str| {
        let path = dir.join(output_file_name(name, format));
        let inner_taken = format == ArchiveFormat::Zst
            && dir
                .join(output_file_name(name, ArchiveFormat::SevenZ))
                .exists();
        path.exists() || inner_taken
    };

    let mut name = display_name.to_string();
    let mut n = 2u32;
    while occupied(&name) {
        name = format!("{display_name} ({n})");
        n += 1;
    }
    if name != display_name {
        tracing::warn!(
            "{:?} already exists in {:?}, writing {:?} instead",
            output_file_name(display_name, format),
            dir,
            output_file_name(&name, format)
        );
    }
    dir.join(output_file_name(&name, format))
}

/// True when the path carries the compound `.7z.zst` suffix.
pub fn is_compound(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase().ends_with(".7z.zst"))
        .unwrap_or(false)
}

/// True when the path looks like an archive the pipeline accepts.
pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            ARCHIVE_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

/// Name of an archive without its archive suffix (compound suffix included).
pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if is_compound(path) {
        return name[..name.len() - ".7z.zst".len()].to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Password that opened the archive (`None` when none was needed)
    pub password: Option<String>,
    /// Candidates tried, including the winner
    pub attempts: usize,
}

/// Working directory of one work item.
///
/// Owns the scratch `TempDir`; dropping the result removes everything that
/// was extracted, whatever state the item ended in.
#[derive(Debug)]
pub struct ExtractionResult {
    workspace: TempDir,
    root: PathBuf,
    /// Password that opened the archive, if any
    pub password: Option<String>,
    /// Input was a folder and the archiver was not run
    pub skipped: bool,
}

impl ExtractionResult {
    /// Allocate a scratch workspace under `temp_dir` with an empty content root.
    pub fn allocate(temp_dir: &Path) -> PipelineResult<Self> {
        std::fs::create_dir_all(temp_dir).map_err(|e| PipelineError::workspace(temp_dir, e))?;
        let workspace = tempfile::Builder::new()
            .prefix("archivist-")
            .tempdir_in(temp_dir)
            .map_err(|e| PipelineError::workspace(temp_dir, e))?;
        let root = workspace.path().join("content");
        std::fs::create_dir_all(&root).map_err(|e| PipelineError::workspace(&root, e))?;
        Ok(Self {
            workspace,
            root,
            password: None,
            skipped: false,
        })
    }

    /// Directory holding the extracted (or copied) tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory that is removed on drop.
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }
}

/// The produced archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArchive {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    /// Size on disk in bytes
    pub size: u64,
}

impl OutputArchive {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// Archive extraction and creation.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Extract `archive` into `dest`, trying `candidates` in order.
    ///
    /// `None` in the candidate list means "no password". `dest` is emptied
    /// before each attempt and left empty when every candidate fails.
    async fn probe_and_extract(
        &self,
        archive: &Path,
        candidates: &[Option<String>],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProbeOutcome>;

    /// Package the contents of `source_dir` into a single file at `output`.
    async fn compress(
        &self,
        source_dir: &Path,
        output: &Path,
        format: ArchiveFormat,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<OutputArchive>;
}

/// Remove everything inside `dir`, creating it if needed.
pub(crate) fn reset_dir(dir: &Path) -> PipelineResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| PipelineError::workspace(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::workspace(dir, e))
}

/// True when `dir` contains at least one regular file at any depth.
pub(crate) fn has_files(dir: &Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}
