//! External tool discovery.
//!
//! The archiver and the transcoder are located through an ordered list of
//! resolution strategies. Strategies are evaluated lazily, the first hit wins,
//! and the answer is cached for the lifetime of the resolver.

pub mod process;

pub use process::{run_tool, ToolOutput};

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::ToolsConfig;
use crate::error::{PipelineError, PipelineResult};

/// The external binaries Archivist drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// 7-Zip class archiver
    Archiver,
    /// FFmpeg class transcoder
    Transcoder,
}

impl Tool {
    /// Directory name under `tools/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Tool::Archiver => "7z",
            Tool::Transcoder => "ffmpeg",
        }
    }

    /// Primary binary name, without platform suffix.
    pub fn binary(self) -> &'static str {
        match self {
            Tool::Archiver => "7z",
            Tool::Transcoder => "ffmpeg",
        }
    }

    /// Alternative names accepted on the system PATH.
    fn path_aliases(self) -> &'static [&'static str] {
        match self {
            Tool::Archiver => &["7z", "7zz", "7za"],
            Tool::Transcoder => &["ffmpeg"],
        }
    }

    fn file_name(self) -> String {
        format!("{}{}", self.binary(), std::env::consts::EXE_SUFFIX)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// One place to look for a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Path set explicitly in the configuration
    Configured(PathBuf),
    /// `<root>/tools/<toolname>/bin/<binary>`
    ToolsSubdirBin(PathBuf),
    /// `<root>/tools/<toolname>/<binary>`
    ToolsSubdir(PathBuf),
    /// `<root>/tools/<binary>`
    ToolsDir(PathBuf),
    /// `<root>/<binary>`
    ProjectRoot(PathBuf),
    /// Lookup on the system PATH
    SystemPath,
}

impl ResolveStrategy {
    /// Try this strategy for `tool`.
    fn resolve(&self, tool: Tool) -> Option<PathBuf> {
        match self {
            ResolveStrategy::Configured(path)
            | ResolveStrategy::ToolsSubdirBin(path)
            | ResolveStrategy::ToolsSubdir(path)
            | ResolveStrategy::ToolsDir(path)
            | ResolveStrategy::ProjectRoot(path) => path.is_file().then(|| path.clone()),
            ResolveStrategy::SystemPath => tool
                .path_aliases()
                .iter()
                .find_map(|name| which::which(name).ok()),
        }
    }

    fn candidate_path(&self) -> Option<&Path> {
        match self {
            ResolveStrategy::Configured(path)
            | ResolveStrategy::ToolsSubdirBin(path)
            | ResolveStrategy::ToolsSubdir(path)
            | ResolveStrategy::ToolsDir(path)
            | ResolveStrategy::ProjectRoot(path) => Some(path),
            ResolveStrategy::SystemPath => None,
        }
    }
}

/// Build the ordered strategy list for `tool`.
pub fn strategies_for(tool: Tool, root: &Path, configured: Option<&Path>) -> Vec<ResolveStrategy> {
    let file_name = tool.file_name();
    let tools_dir = root.join("tools");

    let mut strategies = Vec::with_capacity(6);
    if let Some(path) = configured {
        strategies.push(ResolveStrategy::Configured(path.to_path_buf()));
    }
    strategies.push(ResolveStrategy::ToolsSubdirBin(
        tools_dir.join(tool.dir_name()).join("bin").join(&file_name),
    ));
    strategies.push(ResolveStrategy::ToolsSubdir(
        tools_dir.join(tool.dir_name()).join(&file_name),
    ));
    strategies.push(ResolveStrategy::ToolsDir(tools_dir.join(&file_name)));
    strategies.push(ResolveStrategy::ProjectRoot(root.join(&file_name)));
    strategies.push(ResolveStrategy::SystemPath);
    strategies
}

/// Resolves and caches tool locations for the process lifetime.
#[derive(Debug)]
pub struct ToolResolver {
    root: PathBuf,
    archiver_path: Option<PathBuf>,
    transcoder_path: Option<PathBuf>,
    archiver: OnceLock<Option<PathBuf>>,
    transcoder: OnceLock<Option<PathBuf>>,
}

impl ToolResolver {
    /// Create a resolver from the `[tools]` configuration section.
    pub fn new(config: &ToolsConfig) -> Self {
        let root = config.root_dir.clone().unwrap_or_else(default_root);
        Self {
            root,
            archiver_path: config.archiver_path.clone(),
            transcoder_path: config.transcoder_path.clone(),
            archiver: OnceLock::new(),
            transcoder: OnceLock::new(),
        }
    }

    /// Project root used for the `tools/` lookups.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate `tool`, evaluating strategies on first use only.
    pub fn resolve(&self, tool: Tool) -> PipelineResult<PathBuf> {
        let (cell, configured) = match tool {
            Tool::Archiver => (&self.archiver, self.archiver_path.as_deref()),
            Tool::Transcoder => (&self.transcoder, self.transcoder_path.as_deref()),
        };

        let found = cell.get_or_init(|| {
            let strategies = strategies_for(tool, &self.root, configured);
            let hit = strategies.iter().find_map(|s| s.resolve(tool));
            match &hit {
                Some(path) => tracing::debug!("Resolved {tool} at {:?}", path),
                None => tracing::warn!("{tool} could not be resolved"),
            }
            hit
        });

        found.clone().ok_or_else(|| PipelineError::ToolMissing {
            tool: tool.to_string(),
            searched: strategies_for(tool, &self.root, configured)
                .iter()
                .filter_map(|s| s.candidate_path().map(Path::to_path_buf))
                .collect(),
        })
    }
}

/// Directory of the running executable, falling back to the working directory.
fn default_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
