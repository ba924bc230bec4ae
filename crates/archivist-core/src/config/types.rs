//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory layout and source handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Where finished archives and sidecar folders are written
    pub output_dir: PathBuf,

    /// Scratch space for extraction workspaces
    pub temp_dir: PathBuf,

    /// Directory for the daily log file
    pub log_dir: PathBuf,

    /// Delete an input archive once it has been fully processed
    pub delete_source: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("~/.archivist/output"),
            temp_dir: PathBuf::from("~/.archivist/temp"),
            log_dir: PathBuf::from("~/.archivist/logs"),
            delete_source: false,
        }
    }
}

/// External tool locations and time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Project root used for the `tools/` lookups (defaults to the executable's directory)
    pub root_dir: Option<PathBuf>,

    /// Explicit archiver binary; skips discovery when set
    pub archiver_path: Option<PathBuf>,

    /// Explicit transcoder binary; skips discovery when set
    pub transcoder_path: Option<PathBuf>,

    /// Upper bound for a single archiver invocation, in seconds
    pub archiver_timeout_secs: u64,

    /// Upper bound for a single transcoder invocation, in seconds
    pub transcoder_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            archiver_path: None,
            transcoder_path: None,
            archiver_timeout_secs: 600,
            transcoder_timeout_secs: 120,
        }
    }
}

/// Password probing for incoming archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Commonly used archive passwords, tried after the no-password attempt
    pub passwords: Vec<String>,

    /// Password entered by the operator, tried last
    pub user_password: Option<String>,

    /// Also try the archive's file name and stem as passwords
    pub try_archive_name: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            passwords: vec!["123".to_string(), "123456".to_string()],
            user_password: None,
            try_archive_name: true,
        }
    }
}

/// Output archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Output format: "7z", "zip" or "zst" (7z wrapped in zstd, named `.7z.zst`)
    pub format: String,

    /// Password applied to the output archive (supports ${ENV_VAR} syntax)
    pub password: Option<String>,

    /// Compression level, 0-9
    pub compression_level: u8,

    /// Solid mode for 7z archives
    pub solid: bool,

    /// LZMA2 dictionary size for 7z archives (e.g. "32m")
    pub dictionary_size: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            format: "7z".to_string(),
            password: None,
            compression_level: 9,
            solid: true,
            dictionary_size: "32m".to_string(),
        }
    }
}

/// Image recompression and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Maximum output width in pixels (aspect ratio is preserved)
    pub max_width: u32,

    /// Maximum output height in pixels
    pub max_height: u32,

    /// Encoder quality, 1-100
    pub quality: u8,

    /// Target format: "webp" or "avif"
    pub format: String,

    /// Keep the source image next to the converted one
    pub keep_original: bool,

    /// Keep the converted image inside the packaged tree
    pub keep_converted: bool,

    /// Copy converted images into `<output_dir>/<name>_compressed/`
    pub save_compressed_copy: bool,

    /// Concurrent transcoder invocations within one item
    pub parallel_workers: usize,

    /// Extensions eligible for conversion
    pub supported_formats: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 1080,
            max_height: 1920,
            quality: 80,
            format: "webp".to_string(),
            keep_original: false,
            keep_converted: true,
            save_compressed_copy: false,
            parallel_workers: 4,
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "bmp".to_string(),
                "tiff".to_string(),
                "heic".to_string(),
                "heif".to_string(),
                "webp".to_string(),
                "avif".to_string(),
            ],
        }
    }
}

/// Naming of the packaged tree and the output archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Rename media files sequentially (`<prefix>001.jpg`, ...)
    pub rename_files: bool,

    /// Prefix for renamed images
    pub image_prefix: String,

    /// Prefix for renamed videos
    pub video_prefix: String,

    /// Append `[NP - MMB]` content statistics to the title
    pub append_stats: bool,

    /// Maximum length of the output file name, in characters
    pub max_name_len: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            rename_files: true,
            image_prefix: "image_".to_string(),
            video_prefix: "video_".to_string(),
            append_stats: true,
            max_name_len: 150,
        }
    }
}

/// Remote submission API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Run the Uploading stage at all
    pub enabled: bool,

    /// Submit an article after the upload
    pub publish: bool,

    /// Also upload the converted images and reference them from the article
    pub upload_gallery: bool,

    /// Login account
    pub account: String,

    /// Login password (supports ${ENV_VAR} syntax)
    pub password: String,

    /// Login endpoint
    pub login_endpoint: String,

    /// File upload endpoint
    pub upload_endpoint: String,

    /// Article creation endpoint
    pub article_endpoint: String,

    /// Value sent in the `Device-Id` header
    pub device_id: String,

    /// Category assigned to submitted articles
    pub category_id: u32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Images per gallery upload request
    pub upload_batch_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            publish: true,
            upload_gallery: false,
            account: String::new(),
            password: "${ARCHIVIST_API_PASSWORD}".to_string(),
            login_endpoint: "http://localhost:8080/api/v1/user/login".to_string(),
            upload_endpoint: "http://localhost:8080/api/v1/upload/file".to_string(),
            article_endpoint: "http://localhost:8080/api/v1/article".to_string(),
            device_id: "archivist".to_string(),
            category_id: 2,
            timeout_secs: 120,
            upload_batch_size: 40,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,

    /// Also write a daily log file into `general.log_dir`
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: true,
        }
    }
}
