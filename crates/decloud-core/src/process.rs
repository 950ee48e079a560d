//! Cancellable external commands.

use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code.
    pub code: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Run `command` to completion unless `cancel` fires first.
///
/// On cancellation the child is killed and [`Error::Cancelled`] is returned.
/// A non-zero exit becomes [`Error::CommandFailed`] carrying the trimmed
/// standard error.
pub async fn run_command(mut command: Command, cancel: &CancellationToken) -> Result<CommandOutput> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })?;
    tracing::debug!(program = %program, pid = ?child.id(), "spawned command");

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!(program = %program, "killing command after cancellation");
            return Err(Error::Cancelled);
        }
        output = child.wait_with_output() => output?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(Error::CommandFailed {
            program,
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput {
        code: output.status.code(),
        stdout,
        stderr,
    })
}
