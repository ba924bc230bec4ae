//! Image recompression.
//!
//! Each qualifying image is re-encoded once by an external transcoder. The
//! batch driver runs conversions on a bounded set of tokio tasks, and the
//! retention step decides which of the original and converted files survive.

mod discovery;
mod ffmpeg;
mod retention;

pub use discovery::{DiscoveredFile, ImageDiscovery};
pub use ffmpeg::Ffmpeg;
pub use retention::{apply_retention, RetentionSummary};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ImageConfig;
use crate::error::{PipelineError, PipelineResult};

/// Formats the transcoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    WebP,
    Avif,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::WebP => "webp",
            TargetFormat::Avif => "avif",
        }
    }
}

impl FromStr for TargetFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webp" => Ok(TargetFormat::WebP),
            "avif" => Ok(TargetFormat::Avif),
            other => Err(PipelineError::UnsupportedImageFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Which files survive a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub keep_original: bool,
    pub keep_converted: bool,
    pub save_compressed_copy: bool,
}

/// Everything one conversion needs, resolved from `[image]`.
#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub format: TargetFormat,
    pub retention: RetentionPolicy,
}

impl ImageSettings {
    pub fn from_config(config: &ImageConfig) -> PipelineResult<Self> {
        Ok(Self {
            max_width: config.max_width,
            max_height: config.max_height,
            quality: config.quality,
            format: config.format.parse()?,
            retention: RetentionPolicy {
                keep_original: config.keep_original,
                keep_converted: config.keep_converted,
                save_compressed_copy: config.save_compressed_copy,
            },
        })
    }
}

/// One successful conversion and the keep/discard decision for both files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConversionRecord {
    pub original: PathBuf,
    pub converted: PathBuf,
    pub keep_original: bool,
    pub keep_converted: bool,
}

impl ImageConversionRecord {
    pub fn new(original: PathBuf, converted: PathBuf, retention: &RetentionPolicy) -> Self {
        Self {
            original,
            converted,
            keep_original: retention.keep_original,
            keep_converted: retention.keep_converted,
        }
    }
}

/// A conversion that failed, attributed to its input.
#[derive(Debug)]
pub struct ConversionFailure {
    pub path: PathBuf,
    pub error: PipelineError,
}

/// Outcome of [`convert_many`], in input order.
#[derive(Debug, Default)]
pub struct ConversionBatch {
    pub records: Vec<ImageConversionRecord>,
    pub failures: Vec<ConversionFailure>,
}

impl ConversionBatch {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Re-encodes a single image.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `image` into `output`.
    ///
    /// On failure no partial output is left behind.
    async fn convert(
        &self,
        image: &Path,
        output: &Path,
        settings: &ImageSettings,
        cancel: &CancellationToken,
    ) -> PipelineResult<ImageConversionRecord>;
}

/// Where the converted copy of `source` goes.
///
/// Same-extension conversions get a `.min` infix so the original is never
/// overwritten.
pub fn output_path_for(source: &Path, format: TargetFormat) -> PathBuf {
    let target_ext = format.extension();
    let same_ext = source
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(target_ext))
        .unwrap_or(false);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = if same_ext {
        format!("{stem}.min.{target_ext}")
    } else {
        format!("{stem}.{target_ext}")
    };
    source.with_file_name(file_name)
}

/// Pick an output path for every image, in input order.
///
/// A target that another image already claimed, that is itself an input, or
/// that already exists on disk is never reused. Collisions fall back to the
/// `.min` infix and then to a numbered `.<n>.min` infix.
pub fn plan_outputs(images: &[PathBuf], format: TargetFormat) -> Vec<PathBuf> {
    let ext = format.extension();
    let mut taken: HashSet<PathBuf> = images.iter().cloned().collect();

    images
        .iter()
        .map(|image| {
            let preferred = output_path_for(image, format);
            let stem = image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let is_free = |p: &PathBuf| !taken.contains(p) && !p.exists();

            let mut output = preferred.clone();
            if !is_free(&output) {
                output = image.with_file_name(format!("{stem}.min.{ext}"));
            }
            let mut n = 2u32;
            while !is_free(&output) {
                output = image.with_file_name(format!("{stem}.{n}.min.{ext}"));
                n += 1;
            }
            if output != preferred {
                tracing::debug!("{:?} would collide, writing {:?} instead", image, output);
            }

            taken.insert(output.clone());
            output
        })
        .collect()
}

/// Convert every path, with at most `workers` conversions in flight.
///
/// A failed image never aborts the rest; it is recorded in `failures`.
pub async fn convert_many(
    transcoder: Arc<dyn Transcoder>,
    images: Vec<PathBuf>,
    settings: ImageSettings,
    workers: usize,
    cancel: CancellationToken,
) -> ConversionBatch {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let settings = Arc::new(settings);
    let mut handles = Vec::with_capacity(images.len());
    let outputs = plan_outputs(&images, settings.format);

    for (image, output) in images.into_iter().zip(outputs) {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            tracing::warn!("Conversion semaphore closed unexpectedly, stopping batch");
            break;
        };

        let transcoder = transcoder.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        let path = image.clone();

        let handle = tokio::spawn(async move {
            let result = transcoder.convert(&path, &output, &settings, &cancel).await;
            drop(permit);
            result
        });
        handles.push((image, handle));
    }

    let mut batch = ConversionBatch::default();
    for (path, handle) in handles {
        match handle.await {
            Ok(Ok(record)) => batch.records.push(record),
            Ok(Err(error)) => {
                tracing::warn!("Skipping {:?}: {error}", path);
                batch.failures.push(ConversionFailure { path, error });
            }
            Err(e) => {
                tracing::error!("Conversion task panicked: {e}");
                batch.failures.push(ConversionFailure {
                    error: PipelineError::ConversionFailed {
                        path: path.clone(),
                        message: format!("task panicked: {e}"),
                    },
                    path,
                });
            }
        }
    }

    tracing::info!(
        "Image conversion: {} succeeded, {} failed",
        batch.succeeded(),
        batch.failed()
    );
    batch
}
