//! Bridge configuration
//!
//! Validated settings for one bridge run, assembled from the command line
//! and environment in `main.rs`.

use std::time::Duration;

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, Framing};
use crate::error::BridgeError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default time each forwarding task gets to finish after the server exits
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;

/// Token that may separate bridge options from the server command
const COMMAND_SEPARATOR: &str = "--";

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Which side of the bridge speaks which framing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BridgeMode {
    /// Our stdio is Content-Length framed, the server speaks lines
    #[default]
    FramedClient,
    /// Our stdio is line-delimited, the server is Content-Length framed
    LineClient,
}

impl BridgeMode {
    /// Framing used on the bridge's own stdin/stdout
    pub fn client_framing(self) -> Framing {
        match self {
            BridgeMode::FramedClient => Framing::LengthPrefixed,
            BridgeMode::LineClient => Framing::LineDelimited,
        }
    }

    /// Framing used on the server's stdin/stdout
    pub fn server_framing(self) -> Framing {
        match self {
            BridgeMode::FramedClient => Framing::LineDelimited,
            BridgeMode::LineClient => Framing::LengthPrefixed,
        }
    }
}

/// The wrapped server's command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    /// Executable to launch
    pub program: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Variables set on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl ServerCommand {
    /// Build a command from the trailing tokens of the invocation
    ///
    /// A single leading `--` is dropped. An empty command is a usage error.
    pub fn from_args(mut tokens: Vec<String>) -> Result<Self, BridgeError> {
        if tokens.is_empty() {
            return Err(BridgeError::usage("No server command provided"));
        }

        if tokens[0] == COMMAND_SEPARATOR {
            tokens.remove(0);
            if tokens.is_empty() {
                return Err(BridgeError::usage("No server command provided after --"));
            }
        }

        let program = tokens.remove(0);
        Ok(Self {
            program,
            args: tokens,
            env: Vec::new(),
        })
    }

    /// Add environment overrides for the server
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Human readable command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Server to wrap
    pub command: ServerCommand,

    /// Framing direction
    pub mode: BridgeMode,

    /// Bounded join for each forwarding task once the server has exited
    pub grace_period: Duration,

    /// Largest accepted payload on either side
    pub max_frame_size: usize,
}

impl BridgeConfig {
    /// Create a configuration with default settings
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            mode: BridgeMode::default(),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_mode(mut self, mode: BridgeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Parse a `KEY=VALUE` environment override
pub fn parse_env_assignment(assignment: &str) -> Result<(String, String), String> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{assignment}'"))?;

    if key.is_empty() {
        return Err(format!("empty variable name in '{assignment}'"));
    }

    Ok((key.to_string(), value.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
