//! Lifecycle coordinator
//!
//! Spawns the server, starts the three forwarding tasks, relays termination
//! requests, and turns the server's exit into the bridge's exit code.

use tokio::io::{AsyncRead, AsyncWrite, Stderr, Stdin, Stdout};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::io::{
    ChildProcessManager, Direction, ForwardReport, ProcessError, Terminator, copy_stream,
    forward_messages,
};
use crate::signals::TerminationSource;

/// The bridge's own side of the streams
pub struct BridgeIo<I, O, E> {
    /// Requests from the client
    pub input: I,
    /// Responses to the client
    pub output: O,
    /// Destination for the server's error output
    pub error: E,
}

impl BridgeIo<Stdin, Stdout, Stderr> {
    /// The process's standard streams
    pub fn stdio() -> Self {
        Self {
            input: tokio::io::stdin(),
            output: tokio::io::stdout(),
            error: tokio::io::stderr(),
        }
    }
}

/// One bridge run around one server process
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Run until the server exits and return its exit code
    ///
    /// Forwarding tasks that have not finished within the grace period
    /// after the server exits are abandoned.
    pub async fn run<I, O, E, S>(self, io: BridgeIo<I, O, E>, signals: S) -> Result<i32, BridgeError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
        S: TerminationSource,
    {
        let BridgeConfig {
            command,
            mode,
            grace_period,
            max_frame_size,
        } = self.config;

        let mut child = ChildProcessManager::spawn(&command)?;
        let terminator = child.terminator();
        let pipes = child.take_pipes()?;

        info!(
            "Bridging '{}' ({:?}, client {:?}, server {:?})",
            command.display(),
            mode,
            mode.client_framing(),
            mode.server_framing()
        );

        let client_codec = MessageCodec::new(mode.client_framing(), max_frame_size);
        let server_codec = MessageCodec::new(mode.server_framing(), max_frame_size);

        let inbound = tokio::spawn(forward_messages(
            Direction::Inbound,
            io.input,
            client_codec.clone(),
            pipes.stdin,
            server_codec.clone(),
        ));
        let outbound = tokio::spawn(forward_messages(
            Direction::Outbound,
            pipes.stdout,
            server_codec,
            io.output,
            client_codec,
        ));
        let passthrough = tokio::spawn(copy_stream(pipes.stderr, io.error));

        let code = wait_for_exit(&mut child, terminator, signals).await?;

        let deadline = Instant::now() + grace_period;
        for (name, task) in [("inbound", inbound), ("outbound", outbound)] {
            if let Some(report) = join_within(name, task, deadline).await {
                log_report(&report);
            }
        }
        match join_within("stderr passthrough", passthrough, deadline).await {
            Some(Ok(bytes)) => debug!("Passthrough finished after {} bytes", bytes),
            Some(Err(e)) => debug!("Passthrough stopped: {}", e),
            None => {}
        }

        Ok(code)
    }
}

/// Wait for the server to exit, forwarding termination requests to it
async fn wait_for_exit<S: TerminationSource>(
    child: &mut ChildProcessManager,
    terminator: Terminator,
    mut signals: S,
) -> Result<i32, ProcessError> {
    let mut signals_open = true;

    loop {
        tokio::select! {
            code = child.wait() => return code,
            signal = signals.next_signal(), if signals_open => match signal {
                Some(signal) => {
                    info!("Received {:?}, asking server to terminate", signal);
                    terminator.terminate();
                }
                None => signals_open = false,
            },
        }
    }
}

/// Join a task, abandoning it if it is still running at `deadline`
///
/// Returns `None` when the task panicked or was abandoned.
async fn join_within<T>(name: &str, handle: JoinHandle<T>, deadline: Instant) -> Option<T> {
    match timeout_at(deadline, handle).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            warn!("Task '{}' failed: {}", name, e);
            None
        }
        // Dropping the handle detaches the task; the process exits shortly
        Err(_) => {
            debug!(
                "Task '{}' still running after grace period, abandoning",
                name
            );
            None
        }
    }
}

fn log_report(report: &ForwardReport) {
    debug!(
        direction = report.direction.as_str(),
        forwarded = report.forwarded,
        "Forwarder finished: {:?}",
        report.stop
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeMode, ServerCommand};
    use crate::signals::TerminationSignal;
    use crate::test_utils::{framed, read_to_end_within};
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
    use tokio::sync::mpsc;

    const PIPE_CAPACITY: usize = 64 * 1024;
    const TEST_TIMEOUT: Duration = Duration::from_secs(10);

    struct Harness {
        client_input: DuplexStream,
        client_output: DuplexStream,
        client_error: DuplexStream,
        io: BridgeIo<DuplexStream, DuplexStream, DuplexStream>,
    }

    fn harness() -> Harness {
        let (client_input, input) = duplex(PIPE_CAPACITY);
        let (output, client_output) = duplex(PIPE_CAPACITY);
        let (error, client_error) = duplex(PIPE_CAPACITY);
        Harness {
            client_input,
            client_output,
            client_error,
            io: BridgeIo {
                input,
                output,
                error,
            },
        }
    }

    fn config(program: &str, args: &[&str]) -> BridgeConfig {
        let command = ServerCommand::from_args(
            std::iter::once(program)
                .chain(args.iter().copied())
                .map(String::from)
                .collect(),
        )
        .unwrap();
        BridgeConfig::new(command).with_grace_period(Duration::from_millis(500))
    }

    fn no_signals() -> mpsc::UnboundedReceiver<TerminationSignal> {
        mpsc::unbounded_channel().1
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let Harness {
            mut client_input,
            mut client_output,
            client_error: _client_error,
            io,
        } = harness();

        let bridge = tokio::spawn(Bridge::new(config("cat", &[])).run(io, no_signals()));

        client_input
            .write_all(b"Content-Length: 8\r\n\r\n{\"id\":1}")
            .await
            .unwrap();
        drop(client_input);

        let code = tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 0);

        let output = read_to_end_within(&mut client_output, TEST_TIMEOUT).await;
        assert_eq!(output, b"Content-Length: 8\r\n\r\n{\"id\":1}");
    }

    #[tokio::test]
    async fn test_many_messages_keep_order() {
        let Harness {
            mut client_input,
            mut client_output,
            client_error: _client_error,
            io,
        } = harness();

        let bridge = tokio::spawn(Bridge::new(config("cat", &[])).run(io, no_signals()));

        let mut expected = Vec::new();
        for id in 0..50 {
            let message = framed(&format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#));
            client_input.write_all(&message).await.unwrap();
            expected.extend_from_slice(&message);
        }
        drop(client_input);

        tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let output = read_to_end_within(&mut client_output, TEST_TIMEOUT).await;
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_exit_code_propagates_after_input_closes() {
        let Harness {
            client_input,
            client_output: _client_output,
            client_error: _client_error,
            io,
        } = harness();

        let bridge = tokio::spawn(
            Bridge::new(config("sh", &["-c", "cat >/dev/null; exit 7"])).run(io, no_signals()),
        );

        // Closing our input must close the server's stdin
        drop(client_input);

        let code = tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn test_stderr_passthrough_is_verbatim() {
        let Harness {
            client_input,
            client_output: _client_output,
            mut client_error,
            io,
        } = harness();

        let bridge = tokio::spawn(
            Bridge::new(config("sh", &["-c", "printf 'diag: one\\r\\nraw' >&2"]))
                .run(io, no_signals()),
        );
        drop(client_input);

        tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let errors = read_to_end_within(&mut client_error, TEST_TIMEOUT).await;
        assert_eq!(errors, b"diag: one\r\nraw");
    }

    #[tokio::test]
    async fn test_inbound_framing_error_leaves_outbound_running() {
        let Harness {
            mut client_input,
            mut client_output,
            client_error: _client_error,
            io,
        } = harness();

        // The server answers only after its stdin closes
        let bridge = tokio::spawn(
            Bridge::new(config(
                "sh",
                &["-c", "cat >/dev/null; echo '{\"late\":true}'"],
            ))
            .run(io, no_signals()),
        );

        let mut truncated = b"Content-Length: 100\r\n\r\n".to_vec();
        truncated.extend_from_slice(&[b'x'; 40]);
        client_input.write_all(&truncated).await.unwrap();
        drop(client_input);

        let code = tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 0);

        let output = read_to_end_within(&mut client_output, TEST_TIMEOUT).await;
        assert_eq!(output, framed(r#"{"late":true}"#));
    }

    #[tokio::test]
    async fn test_line_client_mode() {
        let Harness {
            mut client_input,
            mut client_output,
            client_error: _client_error,
            io,
        } = harness();

        // cat echoes the framed request, which comes back as a line
        let bridge = tokio::spawn(
            Bridge::new(config("cat", &[]).with_mode(BridgeMode::LineClient))
                .run(io, no_signals()),
        );

        client_input.write_all(b"{\"id\":1}\n\n{\"id\":2}\n").await.unwrap();
        drop(client_input);

        tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let output = read_to_end_within(&mut client_output, TEST_TIMEOUT).await;
        assert_eq!(output, b"{\"id\":1}\n{\"id\":2}\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_termination_signal_stops_server() {
        let Harness {
            client_input,
            client_output: _client_output,
            client_error: _client_error,
            io,
        } = harness();
        let (signals, receiver) = mpsc::unbounded_channel();

        let bridge = tokio::spawn(Bridge::new(config("sleep", &["30"])).run(io, receiver));

        signals.send(TerminationSignal::Terminate).unwrap();

        // Our input stays open: the inbound task is abandoned after the grace period
        let code = tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .expect("bridge hung after termination request")
            .unwrap()
            .unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
        drop(client_input);
    }

    #[tokio::test]
    async fn test_closed_signal_source_is_ignored() {
        let Harness {
            client_input,
            client_output: _client_output,
            client_error: _client_error,
            io,
        } = harness();
        let (signals, receiver) = mpsc::unbounded_channel::<TerminationSignal>();
        drop(signals);

        let bridge = tokio::spawn(
            Bridge::new(config("sh", &["-c", "cat >/dev/null; exit 4"])).run(io, receiver),
        );
        drop(client_input);

        let code = tokio::time::timeout(TEST_TIMEOUT, bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 4);
    }

    #[tokio::test]
    async fn test_join_within_returns_finished_outcome() {
        let handle = tokio::spawn(async { 42 });

        let outcome = join_within("quick", handle, Instant::now() + TEST_TIMEOUT).await;

        assert_eq!(outcome, Some(42));
    }

    #[tokio::test]
    async fn test_join_within_abandons_late_task() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            42
        });

        let deadline = Instant::now() + Duration::from_millis(50);
        let outcome = join_within("slow", handle, deadline).await;

        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let io = harness().io;

        let result = Bridge::new(config("mcp-bridge-no-such-binary", &[]))
            .run(io, no_signals())
            .await;

        match result {
            Err(error @ BridgeError::Process(ProcessError::Spawn { .. })) => {
                assert_eq!(error.exit_code(), 1);
            }
            other => panic!("Expected spawn failure, got: {other:?}"),
        }
    }
}
