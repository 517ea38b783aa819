//! Message framing codecs
//!
//! Two wire conventions carry the same opaque JSON-RPC payloads:
//!
//! - **Length-framed** ([`FrameCodec`]): a `key: value` header block with a
//!   `Content-Length` field, a blank line, then exactly that many bytes.
//! - **Line-delimited** ([`LineCodec`]): one payload per `\n`-terminated line.
//!
//! Both implement `tokio_util::codec::{Decoder, Encoder}` for [`Bytes`]
//! so the forwarding layer can drive them through `FramedRead`/`FramedWrite`.
//! Payloads are never parsed; only framing metadata is touched.

pub mod frame;
pub mod line;

pub use frame::FrameCodec;
pub use line::LineCodec;

use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound for a single payload (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// One opaque JSON-RPC payload
pub type Message = Bytes;

/// Error types for message framing
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Header block exceeds {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Stream ended inside a header block")]
    TruncatedHeader,

    #[error("Incomplete message: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("Payload contains an embedded newline")]
    EmbeddedNewline,
}

/// Which convention a stream endpoint speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` header block followed by the payload
    LengthPrefixed,
    /// One payload per line
    LineDelimited,
}

/// Codec selected at runtime by [`Framing`]
#[derive(Debug, Clone)]
pub enum MessageCodec {
    Frame(FrameCodec),
    Line(LineCodec),
}

impl MessageCodec {
    /// Create the codec for `framing` with the given payload size limit
    pub fn new(framing: Framing, max_frame_size: usize) -> Self {
        match framing {
            Framing::LengthPrefixed => MessageCodec::Frame(FrameCodec::new(max_frame_size)),
            Framing::LineDelimited => MessageCodec::Line(LineCodec::new(max_frame_size)),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            MessageCodec::Frame(codec) => codec.decode(src),
            MessageCodec::Line(codec) => codec.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            MessageCodec::Frame(codec) => codec.decode_eof(src),
            MessageCodec::Line(codec) => codec.decode_eof(src),
        }
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            MessageCodec::Frame(codec) => codec.encode(item, dst),
            MessageCodec::Line(codec) => codec.encode(item, dst),
        }
    }
}
