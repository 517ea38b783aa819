//! Length-framed codec
//!
//! Handles message framing using Content-Length headers, the same shape
//! the Language Server Protocol uses on stdio.
//!
//! Framing format:
//! Content-Length: <length>\r\n\r\n<content>
//!
//! Other `key: value` header lines are accepted and ignored. Header lines
//! may end in CRLF or bare LF.

use super::{CodecError, DEFAULT_MAX_FRAME_SIZE, Message};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Header key carrying the payload length (matched case-insensitively)
const CONTENT_LENGTH: &str = "content-length";

/// Maximum size of a header block before the blank line
pub const MAX_HEADER_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Reading `key: value` lines until the blank line
    Headers {
        content_length: Option<usize>,
        header_bytes: usize,
    },
    /// Header block complete, waiting for `length` payload bytes
    Payload { length: usize },
}

impl Default for DecodeState {
    fn default() -> Self {
        DecodeState::Headers {
            content_length: None,
            header_bytes: 0,
        }
    }
}

/// Content-Length framing codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec that rejects payloads declared larger than `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::default(),
            max_frame_size,
        }
    }

    /// Parse the value of a Content-Length header
    fn parse_content_length(&self, value: &str) -> Result<usize, CodecError> {
        let length = value
            .parse::<usize>()
            .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;

        if length > self.max_frame_size {
            return Err(CodecError::MessageTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        Ok(length)
    }

    /// Consume one complete header line and update the decode state
    fn consume_header_line(
        &mut self,
        line: &[u8],
        content_length: Option<usize>,
        header_bytes: usize,
    ) -> Result<(), CodecError> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();

        if text.is_empty() {
            // Blank line terminates the header block
            let length = content_length.ok_or(CodecError::MissingContentLength)?;
            self.state = DecodeState::Payload { length };
            return Ok(());
        }

        let (key, value) = text
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(text.to_string()))?;

        let content_length = if key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            Some(self.parse_content_length(value.trim())?)
        } else {
            trace!("FrameCodec: Ignoring header '{}'", key.trim());
            content_length
        };

        self.state = DecodeState::Headers {
            content_length,
            header_bytes: header_bytes + line.len(),
        };
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Headers {
                    content_length,
                    header_bytes,
                } => {
                    let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                        if header_bytes + src.len() > MAX_HEADER_BLOCK_SIZE {
                            return Err(CodecError::HeaderTooLarge {
                                max: MAX_HEADER_BLOCK_SIZE,
                            });
                        }
                        return Ok(None);
                    };

                    if header_bytes + newline + 1 > MAX_HEADER_BLOCK_SIZE {
                        return Err(CodecError::HeaderTooLarge {
                            max: MAX_HEADER_BLOCK_SIZE,
                        });
                    }

                    let line = src.split_to(newline + 1);
                    self.consume_header_line(&line, content_length, header_bytes)?;
                }
                DecodeState::Payload { length } => {
                    if src.len() < length {
                        trace!(
                            "FrameCodec: Incomplete message - need {} more bytes",
                            length - src.len()
                        );
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    let payload = src.split_to(length).freeze();
                    self.state = DecodeState::default();

                    trace!("FrameCodec: Parsed complete message ({} bytes)", length);
                    return Ok(Some(payload));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        match self.state {
            DecodeState::Headers {
                header_bytes: 0, ..
            } if src.is_empty() => Ok(None),
            DecodeState::Headers { .. } => Err(CodecError::TruncatedHeader),
            DecodeState::Payload { length } => Err(CodecError::TruncatedPayload {
                expected: length,
                actual: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = format!("Content-Length: {}\r\n\r\n", item.len());

        trace!(
            "FrameCodec: Encoding framed message ({} bytes content)",
            item.len()
        );

        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&item);
        Ok(())
    }
}
