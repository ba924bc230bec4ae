//! Configuration validation with range checks.

use crate::archive::ArchiveFormat;
use crate::error::ConfigError;
use crate::image::TargetFormat;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.format.parse::<ArchiveFormat>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "archive.format must be one of 7z, zip, zst (got {:?})",
                self.archive.format
            )));
        }
        if self.archive.compression_level > 9 {
            return Err(ConfigError::ValidationError(
                "archive.compression_level must be between 0 and 9".into(),
            ));
        }
        if self.image.format.parse::<TargetFormat>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "image.format must be webp or avif (got {:?})",
                self.image.format
            )));
        }
        if self.image.quality == 0 || self.image.quality > 100 {
            return Err(ConfigError::ValidationError(
                "image.quality must be between 1 and 100".into(),
            ));
        }
        if self.image.max_width == 0 || self.image.max_height == 0 {
            return Err(ConfigError::ValidationError(
                "image.max_width and image.max_height must be > 0".into(),
            ));
        }
        if self.image.parallel_workers == 0 {
            return Err(ConfigError::ValidationError(
                "image.parallel_workers must be > 0".into(),
            ));
        }
        if self.tools.archiver_timeout_secs == 0 || self.tools.transcoder_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools timeouts must be > 0".into(),
            ));
        }
        if self.naming.max_name_len == 0 {
            return Err(ConfigError::ValidationError(
                "naming.max_name_len must be > 0".into(),
            ));
        }
        if self.api.enabled {
            if self.api.account.is_empty() {
                return Err(ConfigError::ValidationError(
                    "api.account must be set when api.enabled = true".into(),
                ));
            }
            if self.api.upload_batch_size == 0 {
                return Err(ConfigError::ValidationError(
                    "api.upload_batch_size must be > 0".into(),
                ));
            }
            if self.api.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "api.timeout_secs must be > 0".into(),
                ));
            }
        }
        Ok(())
    }
}
