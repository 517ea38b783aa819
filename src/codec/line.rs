//! Line-delimited codec
//!
//! One payload per line. Decoding strips the `\n` terminator (and a `\r`
//! before it) and skips whitespace-only keep-alive lines. Encoding appends
//! `\n` and refuses payloads that would split across lines.

use super::{CodecError, DEFAULT_MAX_FRAME_SIZE, Message};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Newline-delimited codec over raw bytes
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Bytes already scanned for a newline in the current buffer
    next_index: usize,
    max_line_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl LineCodec {
    /// Create a codec that rejects lines longer than `max_line_length`
    pub fn new(max_line_length: usize) -> Self {
        Self {
            next_index: 0,
            max_line_length,
        }
    }
}

/// Strip the line terminator, returning `None` for blank lines
fn strip_line(mut line: BytesMut) -> Option<Message> {
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
    }

    if line.iter().all(u8::is_ascii_whitespace) {
        trace!("LineCodec: Skipping blank line");
        return None;
    }

    Some(line.freeze())
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                if src.len() > self.max_line_length {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        max: self.max_line_length,
                    });
                }
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            if newline > self.max_line_length {
                return Err(CodecError::MessageTooLarge {
                    size: newline,
                    max: self.max_line_length,
                });
            }
            let line = src.split_to(newline + 1);

            if let Some(message) = strip_line(line) {
                trace!("LineCodec: Parsed line ({} bytes)", message.len());
                return Ok(Some(message));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }

        // Final line without a terminator
        let rest = src.split();
        Ok(strip_line(rest))
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(&b'\n') {
            return Err(CodecError::EmbeddedNewline);
        }

        dst.reserve(item.len() + 1);
        dst.put_slice(&item);
        dst.put_u8(b'\n');
        Ok(())
    }
}
