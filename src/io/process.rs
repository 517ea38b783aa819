//! Process management layer
//!
//! Spawns the wrapped server with stdin, stdout and stderr piped and owns
//! its lifecycle. The pipes are handed out once, so each endpoint ends up
//! owned by exactly one forwarding task.

use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{info, trace};

use crate::config::ServerCommand;

/// Fallback exit code when the server's status carries neither code nor signal
const UNKNOWN_EXIT_CODE: i32 = 1;

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

/// The three pipe endpoints of a running server
#[derive(Debug)]
pub struct ChildPipes {
    /// Written only by the inbound task
    pub stdin: ChildStdin,

    /// Read only by the outbound task
    pub stdout: ChildStdout,

    /// Read only by the error passthrough task
    pub stderr: ChildStderr,
}

/// Handle that asks the server to exit
///
/// Copyable and lock-free so termination can be requested while another
/// task is blocked waiting on the child.
#[derive(Debug, Clone, Copy)]
pub struct Terminator {
    pid: Option<u32>,
}

impl Terminator {
    /// Request graceful termination (SIGTERM); failures are ignored
    pub fn terminate(&self) {
        let Some(pid) = self.pid else {
            trace!("Terminator: no PID, process already reaped");
            return;
        };

        #[cfg(unix)]
        {
            // Safety: kill(2) has no memory-safety preconditions
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result == 0 {
                info!("Sent SIGTERM to process {}", pid);
            } else {
                trace!(
                    "SIGTERM to process {} failed: {}",
                    pid,
                    io::Error::last_os_error()
                );
            }
        }
        #[cfg(not(unix))]
        {
            tracing::warn!(
                "Termination of process {} not supported on this platform",
                pid
            );
        }
    }
}

/// Owns the spawned server process
#[derive(Debug)]
pub struct ChildProcessManager {
    /// Command line, kept for logging
    command: String,

    /// The spawned child process
    child: Child,

    /// Pipe endpoints until handed to the forwarding tasks
    pipes: Option<ChildPipes>,
}

impl ChildProcessManager {
    /// Start the server with all three stdio streams piped
    ///
    /// The child inherits our environment plus the command's overrides.
    pub fn spawn(command: &ServerCommand) -> Result<Self, ProcessError> {
        let display = command.display();
        info!("Starting process: {} {:?}", command.program, command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: display.clone(),
                source,
            })?;

        info!("Process started with PID: {:?}", child.id());

        // Extract stdio streams immediately so ownership can be partitioned
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        Ok(Self {
            command: display,
            child,
            pipes: Some(ChildPipes {
                stdin,
                stdout,
                stderr,
            }),
        })
    }

    /// Process ID, `None` once the child has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Hand out the pipe endpoints; only succeeds once
    pub fn take_pipes(&mut self) -> Result<ChildPipes, ProcessError> {
        self.pipes.take().ok_or(ProcessError::StdinNotAvailable)
    }

    /// Termination handle for the running child
    pub fn terminator(&self) -> Terminator {
        Terminator { pid: self.pid() }
    }

    /// Wait for the child to exit and return its exit code
    ///
    /// Cancel safe: dropping the future leaves the child untouched.
    pub async fn wait(&mut self) -> Result<i32, ProcessError> {
        let status = self.child.wait().await?;
        let code = exit_code(status);
        info!(
            "Process '{}' exited with status: {} (code {})",
            self.command, status, code
        );
        Ok(code)
    }
}

/// Map an exit status to a process exit code
///
/// Signal deaths follow the shell convention of `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    UNKNOWN_EXIT_CODE
}
