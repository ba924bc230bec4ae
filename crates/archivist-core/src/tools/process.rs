//! Child process execution with a bounded wait and cancellation.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::Tool;
use crate::error::{PipelineError, PipelineResult};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status was zero
    pub success: bool,
    /// Exit code, if the process was not killed by a signal
    pub code: Option<i32>,
    /// Lossily decoded stdout
    pub stdout: String,
    /// Lossily decoded stderr
    pub stderr: String,
}

impl ToolOutput {
    /// Short diagnostic for error messages: stderr if present, else the exit code.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {:?}", self.code)
        } else {
            truncate(stderr, 500).to_string()
        }
    }
}

/// Run `program` with `args`, waiting at most `timeout`.
///
/// The child is killed when the timeout elapses or `cancel` fires; in both
/// cases the caller gets `Timeout` or `Cancelled` instead of an output.
/// `subject` is the file the invocation works on, used for error context.
pub async fn run_tool<I, S>(
    tool: Tool,
    program: &Path,
    args: I,
    subject: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PipelineResult<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::ToolMissing {
                tool: tool.to_string(),
                searched: vec![program.to_path_buf()],
            }
        } else {
            PipelineError::workspace(program, format!("failed to start {tool}: {e}"))
        }
    })?;

    // Dropping the losing branch drops the child, and kill_on_drop reaps it.
    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PipelineError::workspace(subject, format!("{tool} failed: {e}")));
            }
            Err(_) => {
                tracing::warn!("{tool} exceeded {:?} on {:?}, killed", timeout, subject);
                return Err(PipelineError::Timeout {
                    tool: tool.to_string(),
                    path: subject.to_path_buf(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        },
        _ = cancel.cancelled() => {
            tracing::info!("{tool} cancelled on {:?}", subject);
            return Err(PipelineError::Cancelled);
        }
    };

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
