mod bridge;
mod codec;
mod config;
mod error;
mod io;
mod logging;
mod signals;

#[cfg(test)]
mod test_utils;

use bridge::{Bridge, BridgeIo};
use clap::{CommandFactory, Parser};
use codec::DEFAULT_MAX_FRAME_SIZE;
use config::{BridgeConfig, BridgeMode, DEFAULT_GRACE_PERIOD_MS, ServerCommand, parse_env_assignment};
use error::{BridgeError, FAILURE_EXIT_CODE};
use logging::{LogConfig, init_logging};
use signals::OsSignals;

use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Bridge a Content-Length framed MCP client to a line-delimited stdio server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which side speaks Content-Length framing
    #[arg(long, value_enum, env = "MCP_BRIDGE_MODE", default_value_t = BridgeMode::FramedClient)]
    mode: BridgeMode,

    /// Time each forwarding task gets to finish after the server exits
    #[arg(long, value_name = "MS", env = "MCP_BRIDGE_GRACE_MS", default_value_t = DEFAULT_GRACE_PERIOD_MS)]
    grace_period_ms: u64,

    /// Largest accepted message payload in bytes
    #[arg(long, value_name = "BYTES", env = "MCP_BRIDGE_MAX_FRAME", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Extra environment variable for the server (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_assignment)]
    env: Vec<(String, String)>,

    /// Log level (overrides MCP_BRIDGE_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides MCP_BRIDGE_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Server command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

async fn run(args: Args) -> Result<i32, BridgeError> {
    let command = ServerCommand::from_args(args.command)?.with_env(args.env);

    let config = BridgeConfig::new(command)
        .with_mode(args.mode)
        .with_grace_period(Duration::from_millis(args.grace_period_ms))
        .with_max_frame_size(args.max_frame_size);

    // Handlers go in before the server starts so no signal is lost
    let signals = OsSignals::install().map_err(BridgeError::Signal)?;

    Bridge::new(config).run(BridgeIo::stdio(), signals).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(FAILURE_EXIT_CODE);
    }

    let code = match run(args).await {
        Ok(code) => {
            info!("Server exited with code {}", code);
            code
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if matches!(e, BridgeError::Usage(_)) {
                eprintln!("{}", Args::command().render_usage());
            }
            e.exit_code()
        }
    };

    // A blocked stdin read would otherwise hold the runtime open
    std::process::exit(code);
}
