//! File discovery for finding convertible images in a working tree.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::naming::natural_sort_key;

/// Discovers image files eligible for conversion.
pub struct ImageDiscovery {
    supported_formats: Vec<String>,
}

/// Information about a discovered file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Full path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
}

impl ImageDiscovery {
    /// Create a discovery over the given extension allow-list.
    pub fn new(supported_formats: &[String]) -> Self {
        Self {
            supported_formats: supported_formats.iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    /// Recursively find all supported files under `root`, in natural order.
    pub fn discover(&self, root: &Path) -> Vec<DiscoveredFile> {
        let mut files: Vec<DiscoveredFile> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_supported(e.path()))
            .filter_map(|e| {
                let size = e.metadata().ok()?.len();
                Some(DiscoveredFile {
                    path: e.into_path(),
                    size,
                })
            })
            .collect();

        files.sort_by_cached_key(|f| natural_sort_key(&f.path.to_string_lossy()));
        files
    }

    /// Check if a file has a supported extension.
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.supported_formats.iter().any(|fmt| *fmt == ext_lower)
            })
            .unwrap_or(false)
    }

    /// Get total size of all discovered files.
    pub fn total_size(files: &[DiscoveredFile]) -> u64 {
        files.iter().map(|f| f.size).sum()
    }
}
