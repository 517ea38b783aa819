//! Top-level error types for the bridge
//!
//! Framing problems never surface here: they stop a single forwarding
//! task (see [`crate::io::forward::StopReason`]) and are only logged.

use std::io;

use crate::io::process::ProcessError;

/// Exit code for invocation errors (no server command, bad options)
pub const USAGE_EXIT_CODE: i32 = 2;

/// Exit code for fatal bridge failures that happen before the child runs
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Fatal errors that end the bridge without a child exit code
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The invocation is unusable
    #[error("{0}")]
    Usage(String),

    /// The server could not be started or its pipes are missing
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Termination handlers could not be installed
    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

impl BridgeError {
    /// Create a usage error with the given message
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Process exit code to report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Usage(_) => USAGE_EXIT_CODE,
            BridgeError::Process(_) | BridgeError::Signal(_) => FAILURE_EXIT_CODE,
        }
    }
}
