//! FFmpeg-backed transcoder.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ImageConversionRecord, ImageSettings, TargetFormat, Transcoder};
use crate::error::{PipelineError, PipelineResult};
use crate::tools::{run_tool, Tool, ToolResolver};

/// Runs one ffmpeg process per image.
pub struct Ffmpeg {
    resolver: Arc<ToolResolver>,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(resolver: Arc<ToolResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }
}

/// Command line for converting `input` into `output`.
pub(crate) fn build_args(input: &Path, output: &Path, settings: &ImageSettings) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.as_os_str().to_os_string(),
        "-vf".into(),
        format!(
            "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease",
            settings.max_width, settings.max_height
        )
        .into(),
    ];

    let encoder: Vec<String> = match settings.format {
        TargetFormat::WebP => vec![
            "-q:v".into(),
            settings.quality.to_string(),
            "-compression_level".into(),
            "6".into(),
        ],
        TargetFormat::Avif => {
            let crf = (100 - u32::from(settings.quality.min(100))) * 63 / 100;
            vec![
                "-c:v".into(),
                "libaom-av1".into(),
                "-crf".into(),
                crf.to_string(),
                "-cpu-used".into(),
                "8".into(),
                "-row-mt".into(),
                "1".into(),
            ]
        }
    };
    args.extend(encoder.into_iter().map(OsString::from));

    args.push("-y".into());
    args.push(output.as_os_str().to_os_string());
    args
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn convert(
        &self,
        image: &Path,
        output: &Path,
        settings: &ImageSettings,
        cancel: &CancellationToken,
    ) -> PipelineResult<ImageConversionRecord> {
        if !image.is_file() {
            return Err(PipelineError::FileNotFound(image.to_path_buf()));
        }
        let program = self.resolver.resolve(Tool::Transcoder)?;
        let args = build_args(image, output, settings);

        tracing::trace!("Converting {:?} -> {:?}", image, output);
        let result = run_tool(Tool::Transcoder, &program, &args, image, self.timeout, cancel).await;

        let failure = match result {
            Ok(out) if out.success => match std::fs::metadata(output) {
                Ok(meta) if meta.len() > 0 => {
                    return Ok(ImageConversionRecord::new(
                        image.to_path_buf(),
                        output.to_path_buf(),
                        &settings.retention,
                    ));
                }
                _ => PipelineError::ConversionFailed {
                    path: image.to_path_buf(),
                    message: "transcoder produced no output".to_string(),
                },
            },
            Ok(out) => PipelineError::ConversionFailed {
                path: image.to_path_buf(),
                message: out.diagnostic(),
            },
            Err(e) => e,
        };

        if output.exists() {
            if let Err(e) = std::fs::remove_file(output) {
                tracing::warn!("Failed to remove partial output {:?}: {e}", output);
            }
        }
        Err(failure)
    }
}
