//! External process execution.
//!
//! Commands are always spawned from an argument vector, never through a
//! shell, so file names cannot inject anything regardless of content. Each
//! run has a hard wall-clock budget. When it expires the child is killed and
//! a sweep force-terminates any stray rasterizer processes by name.

use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{PdfSmithError, Result};

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// Whether the process exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external tools with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    kill_timeout: Duration,
    kill_commands: Vec<Vec<OsString>>,
}

impl ProcessGateway {
    /// Gateway whose kill sweep commands get `kill_timeout` each.
    pub fn new(kill_timeout: Duration) -> Self {
        Self {
            kill_timeout,
            kill_commands: kill_commands(),
        }
    }

    /// Replace the platform kill sweep with `commands`.
    pub fn with_kill_commands(mut self, commands: Vec<Vec<OsString>>) -> Self {
        self.kill_commands = commands;
        self
    }

    /// Run `argv` (program first) and wait at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `ToolUnavailable` when the program cannot be found
    /// - `Timeout` when the budget expires; the child is killed and the
    ///   known-tool sweep runs before returning
    /// - `Io` for any other spawn or wait failure
    pub async fn run(&self, argv: &[OsString], timeout: Duration) -> Result<ProcessOutput> {
        match execute(argv, timeout).await {
            Err(e @ PdfSmithError::Timeout { .. }) => {
                error!(error = %e, "external tool timed out");
                self.kill_known_tools().await;
                Err(e)
            }
            Err(e) => {
                error!(program = %program_name(argv), error = %e, "external tool failed to run");
                Err(e)
            }
            ok => ok,
        }
    }

    /// Force-terminate rasterizer processes by name.
    ///
    /// Returns whether at least one process was terminated, judged only by
    /// the kill command's exit code so the tool's locale does not matter.
    pub async fn kill_known_tools(&self) -> bool {
        let mut killed = false;
        for argv in &self.kill_commands {
            match execute(argv, self.kill_timeout).await {
                Ok(output) if output.success() => killed = true,
                Ok(output) => {
                    debug!(command = %program_name(&argv), code = ?output.exit_code, "nothing to terminate");
                }
                Err(e) => warn!(command = %program_name(&argv), error = %e, "kill sweep failed"),
            }
        }

        if killed {
            info!("terminated stray rasterizer processes");
        }
        killed
    }
}

/// Platform-specific commands that terminate the rasterizer by name.
pub fn kill_commands() -> Vec<Vec<OsString>> {
    let argv = |parts: &[&str]| parts.iter().map(OsString::from).collect::<Vec<_>>();
    if cfg!(windows) {
        vec![
            argv(&["taskkill", "/f", "/im", "gswin64c.exe"]),
            argv(&["taskkill", "/f", "/im", "gswin32c.exe"]),
        ]
    } else {
        // Exact process-name match; a pattern match would hit unrelated
        // processes whose command line merely contains "gs".
        vec![argv(&["pkill", "-x", "gs"])]
    }
}

async fn execute(argv: &[OsString], timeout: Duration) -> Result<ProcessOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(PdfSmithError::invalid_config("Empty command line"));
    };

    debug!(program = %program.to_string_lossy(), args = args.len(), "spawning external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PdfSmithError::tool_unavailable(program.to_string_lossy())
            }
            _ => PdfSmithError::from(e),
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PdfSmithError::Timeout {
            program: program_name(argv),
            seconds: timeout.as_secs(),
        }),
    }
}

fn program_name(argv: &[OsString]) -> String {
    argv.first()
        .map(|p| {
            std::path::Path::new(p)
                .file_name()
                .unwrap_or(OsStr::new(p))
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_default()
}
