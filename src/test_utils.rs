//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and framing helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects RUST_LOG with a default of `debug`, and writes through the
    /// test writer so output stays attached to the test that produced it.
    ///
    /// # Examples
    ///
    /// ```bash
    /// # Run tests with default logging
    /// cargo test --features test-logging
    ///
    /// # Trace every forwarded message
    /// RUST_LOG=mcp_stdio_bridge=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer() // Ensures logs don't interfere with test output
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Ignore errors if already initialized by another test
        });
    }
}

/// Global test logging setup
///
/// Add this to any test module where you want automatic logging initialization.
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

#[cfg(all(test, feature = "test-logging"))]
setup_test_logging!();

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, FramedRead};

/// Encode `payload` the way a length-framed client would send it
pub fn framed(payload: &str) -> Vec<u8> {
    format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload).into_bytes()
}

/// Decode every message in `input`, stopping at the first error
pub async fn decode_all<D>(input: &[u8], decoder: D) -> (Vec<Bytes>, Option<D::Error>)
where
    D: Decoder<Item = Bytes>,
{
    let mut reader = FramedRead::new(input, decoder);
    let mut messages = Vec::new();

    while let Some(result) = reader.next().await {
        match result {
            Ok(message) => messages.push(message),
            Err(e) => return (messages, Some(e)),
        }
    }

    (messages, None)
}

/// Read `reader` to end-of-stream, failing the test if that takes too long
pub async fn read_to_end_within<R: AsyncRead + Unpin>(reader: &mut R, limit: Duration) -> Vec<u8> {
    let mut buffer = Vec::new();
    tokio::time::timeout(limit, reader.read_to_end(&mut buffer))
        .await
        .expect("stream was not closed in time")
        .expect("read failed");
    buffer
}
