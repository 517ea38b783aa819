//! Forwarding tasks
//!
//! Each direction of the bridge is a single loop that decodes messages from
//! one reader and re-encodes them onto one writer, so messages keep their
//! order within a direction. The loops share nothing: every stream endpoint
//! is moved into exactly one task.
//!
//! A task stops on end-of-stream, on a framing violation, or when its
//! writer fails. Stopping never touches the sibling tasks or the child.

use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::{Level, debug, trace, warn};

use crate::codec::{CodecError, Message};
use crate::log_bridge_message;

/// Size of the read buffer for the error passthrough
const READ_BUFFER_SIZE: usize = 4096;

/// Which way a forwarding task moves messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bridge stdin to server stdin
    Inbound,
    /// Server stdout to bridge stdout
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a forwarding task stopped
#[derive(Debug)]
pub enum StopReason {
    /// The reader reached end-of-stream
    EndOfStream,
    /// A message violated its framing convention
    Framing(CodecError),
    /// Reading failed with an I/O error
    ReadFailed(io::Error),
    /// The peer stopped accepting writes, usually because it exited
    WriteFailed(io::Error),
}

/// Summary of a finished forwarding task
#[derive(Debug)]
pub struct ForwardReport {
    pub direction: Direction,
    pub forwarded: u64,
    pub stop: StopReason,
}

/// Forward messages from `reader` to `writer`, re-framing each one
///
/// On end-of-stream the writer is shut down so the peer sees end-of-input;
/// in every other case it is simply dropped, which closes it as well.
pub async fn forward_messages<R, D, W, E>(
    direction: Direction,
    reader: R,
    decoder: D,
    writer: W,
    encoder: E,
) -> ForwardReport
where
    R: AsyncRead + Unpin,
    D: Decoder<Item = Message, Error = CodecError>,
    W: AsyncWrite + Unpin,
    E: Encoder<Message, Error = CodecError>,
{
    let mut source = FramedRead::new(reader, decoder);
    let mut sink = FramedWrite::new(writer, encoder);
    let mut forwarded = 0u64;

    trace!("Forwarder: {} task running", direction);

    let stop = loop {
        let message = match source.next().await {
            None => break StopReason::EndOfStream,
            Some(Ok(message)) => message,
            Some(Err(CodecError::Io(e))) => break StopReason::ReadFailed(e),
            Some(Err(e)) => break StopReason::Framing(e),
        };

        let size = message.len();
        // send() flushes, so every message leaves as one complete unit
        match sink.send(message).await {
            Ok(()) => {
                forwarded += 1;
                log_bridge_message!(Level::TRACE, direction.as_str(), size);
            }
            Err(CodecError::Io(e)) => break StopReason::WriteFailed(e),
            Err(e) => break StopReason::Framing(e),
        }
    };

    if matches!(stop, StopReason::EndOfStream) {
        if let Err(e) = SinkExt::<Message>::close(&mut sink).await {
            trace!("Forwarder: {} close failed: {}", direction, e);
        }
    }

    match &stop {
        StopReason::Framing(e) => warn!(
            direction = direction.as_str(),
            forwarded, "Forwarding stopped on framing error: {}", e
        ),
        StopReason::EndOfStream => debug!(
            direction = direction.as_str(),
            forwarded, "Forwarding stopped at end of stream"
        ),
        StopReason::ReadFailed(e) | StopReason::WriteFailed(e) => debug!(
            direction = direction.as_str(),
            forwarded, "Forwarding stopped: {}", e
        ),
    }

    ForwardReport {
        direction,
        forwarded,
        stop,
    }
}

/// Copy raw bytes from `reader` to `writer` until end-of-stream
///
/// The reader is always drained, even after the writer has failed, so a
/// server blocked on a full stderr pipe can make progress. Returns the
/// number of bytes read.
pub async fn copy_stream<R, W>(mut reader: R, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = Box::new([0u8; READ_BUFFER_SIZE]);
    let mut total = 0u64;
    let mut writer_open = true;

    loop {
        let n = reader.read(buffer.as_mut()).await?;
        if n == 0 {
            trace!("Passthrough: EOF reached after {} bytes", total);
            return Ok(total);
        }
        total += n as u64;

        if writer_open {
            if let Err(e) = write_chunk(&mut writer, &buffer[..n]).await {
                debug!("Passthrough: writer failed, draining only: {}", e);
                writer_open = false;
            }
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}
