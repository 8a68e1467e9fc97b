use std::{ffi::OsStr, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {}s", .limit.as_secs())]
    Timeout { program: String, limit: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Diagnostic text for a failed run: stderr, then stdout, then a placeholder.
    pub fn diagnostic(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("Unknown error occurred")
            .to_owned()
    }
}

/// Runs `program` once and waits at most `limit` for it to exit.
///
/// The child is spawned with `kill_on_drop`, so when the deadline passes the
/// pending wait future is dropped and the process is killed. Only the direct
/// child gets the SIGKILL: a privileged grandchild behind `sudo` survives it,
/// so callers running through sudo must also bound the work on the far side.
pub async fn run<I, S>(program: &str, args: I, limit: Duration) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(?command, "spawning");
    let child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(source)) => Err(CommandError::Spawn {
            program: program.to_owned(),
            source,
        }),
        Err(_) => {
            warn!("{program} timed out after {}s", limit.as_secs());
            Err(CommandError::Timeout {
                program: program.to_owned(),
                limit,
            })
        }
    }
}
