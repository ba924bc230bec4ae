//! 7-Zip class archiver backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::candidates::{mask_password, try_candidates, AttemptError, TryOutcome};
use super::{has_files, is_compound, reset_dir, ArchiveFormat, Archiver, OutputArchive, ProbeOutcome};
use crate::config::ArchiveConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::tools::{run_tool, Tool, ToolOutput, ToolResolver};

/// Archiver output that means the password was wrong or missing.
const PASSWORD_HINTS: &[&str] = &[
    "wrong password",
    "can not open encrypted archive",
    "data error in encrypted",
    "password required",
    "enter password",
];

/// Archiver output that means the container type itself is not readable.
const UNSUPPORTED_HINTS: &[&str] = &[
    "can not open the file as",
    "cannot open the file as",
    "unsupported method",
    "is not archive",
];

/// Drives the external 7z binary.
pub struct SevenZip {
    resolver: Arc<ToolResolver>,
    settings: ArchiveConfig,
    timeout: Duration,
}

impl SevenZip {
    pub fn new(resolver: Arc<ToolResolver>, settings: ArchiveConfig, timeout: Duration) -> Self {
        Self {
            resolver,
            settings,
            timeout,
        }
    }

    /// One full extraction attempt with a single candidate.
    async fn attempt(
        &self,
        program: &Path,
        archive: &Path,
        dest: &Path,
        password: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        reset_dir(dest).map_err(AttemptError::Fatal)?;
        self.extract_into(program, archive, dest, password.as_deref(), cancel)
            .await?;

        if is_compound(archive) {
            let inner = find_inner_container(dest).ok_or_else(|| {
                AttemptError::Fatal(PipelineError::ExtractionFailed {
                    path: archive.to_path_buf(),
                    message: "no inner .7z container inside the zstd layer".to_string(),
                })
            })?;
            self.extract_into(program, &inner, dest, password.as_deref(), cancel)
                .await?;
            std::fs::remove_file(&inner)
                .map_err(|e| AttemptError::Fatal(PipelineError::workspace(&inner, e)))?;
        }

        if has_files(dest) {
            Ok(())
        } else {
            Err(AttemptError::Rejected("archiver reported success but nothing was extracted".into()))
        }
    }

    async fn extract_into(
        &self,
        program: &Path,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        let args = vec![
            OsString::from("x"),
            archive.as_os_str().to_os_string(),
            switch("-o", dest.as_os_str()),
            password_switch(password),
            OsString::from("-y"),
        ];

        let output = run_tool(Tool::Archiver, program, &args, archive, self.timeout, cancel)
            .await
            .map_err(AttemptError::Fatal)?;

        if output.success {
            return Ok(());
        }
        Err(classify_failure(&output, archive))
    }

    /// Build the `a` command line for a single-layer 7z or zip archive.
    fn create_args(
        &self,
        source_dir: &Path,
        output: &Path,
        format: ArchiveFormat,
        password: Option<&str>,
    ) -> Vec<OsString> {
        let level = self.settings.compression_level.min(9);
        let mut args = vec![
            OsString::from("a"),
            OsString::from(format!("-t{}", format.archiver_type())),
        ];

        match format {
            ArchiveFormat::Zip => {
                args.push("-m0=deflate".into());
                args.push(format!("-mx={level}").into());
            }
            _ => {
                args.push("-m0=lzma2".into());
                args.push(format!("-mx={level}").into());
                args.push(format!("-md={}", self.settings.dictionary_size).into());
                args.push(if self.settings.solid { "-ms=on" } else { "-ms=off" }.into());
                let fast_bytes = (u32::from(level) * 8).clamp(32, 64);
                args.push(format!("-mfb={fast_bytes}").into());
            }
        }

        if let Some(pw) = password.filter(|p| !p.is_empty()) {
            args.push(format!("-p{pw}").into());
        }
        args.push(output.as_os_str().to_os_string());
        args.push(source_dir.join("*").into_os_string());
        args
    }

    async fn create(
        &self,
        program: &Path,
        source_dir: &Path,
        output: &Path,
        format: ArchiveFormat,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let args = self.create_args(source_dir, output, format, password);
        let result = run_tool(Tool::Archiver, program, &args, output, self.timeout, cancel).await?;
        ensure_written(&result, output)
    }

    /// Produce `output` in `format`. `.7z.zst` goes through an intermediate `.7z`.
    async fn write_archive(
        &self,
        program: &Path,
        source_dir: &Path,
        output: &Path,
        format: ArchiveFormat,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if format != ArchiveFormat::Zst {
            return self
                .create(program, source_dir, output, format, password, cancel)
                .await;
        }

        let inner = zst_inner_path(output);
        remove_if_exists(&inner)?;
        self.create(program, source_dir, &inner, ArchiveFormat::SevenZ, password, cancel)
            .await?;

        let level = self.settings.compression_level.min(9);
        let args = vec![
            OsString::from("a"),
            OsString::from("-tzstd"),
            OsString::from(format!("-mx={level}")),
            output.as_os_str().to_os_string(),
            inner.as_os_str().to_os_string(),
        ];
        let result = run_tool(Tool::Archiver, program, &args, output, self.timeout, cancel).await;
        if let Err(e) = std::fs::remove_file(&inner) {
            tracing::warn!("Failed to remove intermediate {:?}: {e}", inner);
        }
        ensure_written(&result?, output)
    }
}

#[async_trait]
impl Archiver for SevenZip {
    async fn probe_and_extract(
        &self,
        archive: &Path,
        candidates: &[Option<String>],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProbeOutcome> {
        if !archive.exists() {
            return Err(PipelineError::FileNotFound(archive.to_path_buf()));
        }
        if candidates.is_empty() {
            reset_dir(dest)?;
            return Err(PipelineError::DecryptionFailed {
                path: archive.to_path_buf(),
                attempts: 0,
            });
        }

        let program = self.resolver.resolve(Tool::Archiver)?;
        tracing::debug!(
            "Extracting {:?} with {} password candidates",
            archive,
            candidates.len()
        );

        let outcome = try_candidates(candidates, |password| {
            self.attempt(&program, archive, dest, password, cancel)
        })
        .await;

        match outcome {
            TryOutcome::Success {
                password, attempts, ..
            } => {
                match &password {
                    Some(pw) => tracing::info!(
                        "Extracted {:?} with password {} (attempt {attempts})",
                        archive,
                        mask_password(pw)
                    ),
                    None => tracing::info!("Extracted {:?} without password", archive),
                }
                Ok(ProbeOutcome { password, attempts })
            }
            TryOutcome::Exhausted { attempts } => {
                reset_dir(dest)?;
                Err(PipelineError::DecryptionFailed {
                    path: archive.to_path_buf(),
                    attempts,
                })
            }
            TryOutcome::Fatal(e) => {
                reset_dir(dest)?;
                Err(e)
            }
        }
    }

    async fn compress(
        &self,
        source_dir: &Path,
        output: &Path,
        format: ArchiveFormat,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<OutputArchive> {
        let program = self.resolver.resolve(Tool::Archiver)?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::workspace(parent, e))?;
        }
        if output.exists() {
            tracing::warn!("Replacing existing archive {:?}", output);
        }
        // `a` appends to an existing archive; start from scratch.
        remove_if_exists(output)?;

        if let Err(e) = self
            .write_archive(&program, source_dir, output, format, password, cancel)
            .await
        {
            discard_partial(output, format);
            return Err(e);
        }

        let size = std::fs::metadata(output)
            .map_err(|e| PipelineError::workspace(output, e))?
            .len();
        tracing::info!("Packaged {:?} ({} bytes, {format})", output, size);

        Ok(OutputArchive {
            path: output.to_path_buf(),
            format,
            size,
        })
    }
}

fn switch(prefix: &str, value: &std::ffi::OsStr) -> OsString {
    let mut s = OsString::from(prefix);
    s.push(value);
    s
}

/// `-p<pw>`; a bare `-p` keeps the archiver from prompting on encrypted input.
fn password_switch(password: Option<&str>) -> OsString {
    OsString::from(format!("-p{}", password.unwrap_or("")))
}

fn classify_failure(output: &ToolOutput, archive: &Path) -> AttemptError {
    let text = format!("{}\n{}", output.stderr, output.stdout).to_lowercase();
    if PASSWORD_HINTS.iter().any(|hint| text.contains(hint)) {
        return AttemptError::Rejected(output.diagnostic());
    }
    if UNSUPPORTED_HINTS.iter().any(|hint| text.contains(hint)) {
        return AttemptError::Fatal(PipelineError::UnsupportedFormat {
            path: archive.to_path_buf(),
            format: archive
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()),
        });
    }
    AttemptError::Rejected(output.diagnostic())
}

fn ensure_written(result: &ToolOutput, output: &Path) -> PipelineResult<()> {
    if !result.success {
        return Err(PipelineError::CompressionFailed {
            path: output.to_path_buf(),
            message: result.diagnostic(),
        });
    }
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(PipelineError::CompressionFailed {
            path: output.to_path_buf(),
            message: "archiver produced an empty file".to_string(),
        }),
        Err(_) => Err(PipelineError::CompressionFailed {
            path: output.to_path_buf(),
            message: "archiver produced no output file".to_string(),
        }),
    }
}

fn remove_if_exists(path: &Path) -> PipelineResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::workspace(path, e)),
    }
}

/// `<name>.7z` for a `<name>.7z.zst` output.
fn zst_inner_path(output: &Path) -> PathBuf {
    output.with_extension("")
}

/// Remove whatever a failed compress left behind.
fn discard_partial(output: &Path, format: ArchiveFormat) {
    let mut leftovers = vec![output.to_path_buf()];
    if format == ArchiveFormat::Zst {
        leftovers.push(zst_inner_path(output));
    }
    for path in leftovers {
        if let Err(e) = remove_if_exists(&path) {
            tracing::warn!("Failed to remove partial archive: {e}");
        }
    }
}

fn find_inner_container(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("7z"))
                    .unwrap_or(false)
        })
}
