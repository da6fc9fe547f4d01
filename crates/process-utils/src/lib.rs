//! Child-process helpers for the external media tools (yt-dlp, ffmpeg, ffprobe).
//!
//! Every command built here suppresses the console window on Windows, and the
//! async variants are killed when their future is dropped so that a cancelled
//! ingestion attempt never leaves a tool running in the background.

use std::ffi::OsStr;
use std::process::ExitStatus;

use thiserror::Error;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Maximum number of stderr bytes kept in a [`ProcessError::Failed`] message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Failure to run an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary could not be started (missing, not executable, ...).
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process or reading its pipes failed.
    #[error("failed to wait for {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully.
    #[error("{tool} exited with {code}: {stderr}", code = exit_code_label(*.code))]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl ProcessError {
    /// The tool name the error refers to.
    pub fn tool(&self) -> &str {
        match self {
            Self::Spawn { tool, .. } | Self::Wait { tool, .. } | Self::Failed { tool, .. } => tool,
        }
    }

    /// Captured stderr tail for failed runs, empty otherwise.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "signal".to_string(),
    }
}

/// Output of a successful tool run.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Keep only the last `STDERR_TAIL_BYTES` of a tool's stderr, on a char boundary.
pub fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Run `<program> <version_arg>` and return the first line of its output.
///
/// Returns `None` when the tool is missing or exits unsuccessfully.
pub fn tool_version(program: impl AsRef<OsStr>, version_arg: &str) -> Option<String> {
    let mut cmd = std_command(program);
    cmd.arg(version_arg);
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The child is killed if the handle is dropped before it exits.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit status is turned into [`ProcessError::Failed`] carrying the
/// tail of stderr, which is usually where the media tools explain themselves.
#[cfg(feature = "tokio")]
pub async fn run_captured(
    tool: &str,
    cmd: &mut tokio::process::Command,
) -> Result<CapturedOutput, ProcessError> {
    use std::process::Stdio;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ProcessError::Wait {
            tool: tool.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ProcessError::Failed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: stderr_tail(&stderr),
        });
    }

    Ok(CapturedOutput {
        status: output.status,
        stdout,
        stderr,
    })
}
