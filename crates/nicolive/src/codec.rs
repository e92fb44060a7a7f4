//! NUL-delimited framing for the comment server byte stream.
//!
//! Every record on the wire, in both directions, is a single XML element
//! followed by one `0x00` byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::DecodeError;

const DELIMITER: u8 = 0x00;

/// Default upper bound for a single inbound frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// One unit produced by [`NulDelimitedCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Frame payload with the terminator stripped.
    Record(Bytes),
    /// A frame longer than the configured limit; its bytes were discarded.
    Oversized { len: usize },
}

/// Splits a byte stream at NUL bytes and appends one to outgoing payloads.
#[derive(Debug, Clone)]
pub struct NulDelimitedCodec {
    max_length: usize,
    /// Offset already scanned for a terminator in the current buffer.
    next_index: usize,
    /// Bytes thrown away so far while skipping an oversized frame.
    discarding: Option<usize>,
}

impl Default for NulDelimitedCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl NulDelimitedCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|b| *b == DELIMITER)
}

impl Decoder for NulDelimitedCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        if let Some(discarded) = self.discarding {
            return Ok(match find_delimiter(buf) {
                Some(pos) => {
                    buf.advance(pos + 1);
                    self.discarding = None;
                    Some(Frame::Oversized {
                        len: discarded + pos,
                    })
                }
                None => {
                    self.discarding = Some(discarded + buf.len());
                    buf.clear();
                    None
                }
            });
        }

        let Some(offset) = find_delimiter(&buf[self.next_index..]) else {
            if buf.len() > self.max_length {
                self.discarding = Some(buf.len());
                self.next_index = 0;
                buf.clear();
            } else {
                self.next_index = buf.len();
            }
            return Ok(None);
        };

        let end = self.next_index + offset;
        self.next_index = 0;

        if end > self.max_length {
            buf.advance(end + 1);
            return Ok(Some(Frame::Oversized { len: end }));
        }

        let mut frame = buf.split_to(end + 1);
        frame.truncate(end);
        Ok(Some(Frame::Record(frame.freeze())))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if let Some(discarded) = self.discarding.take() {
            buf.clear();
            return Err(DecodeError::PartialFrame { len: discarded });
        }

        // Trailing whitespace after the last terminator is not a frame.
        if buf.iter().all(u8::is_ascii_whitespace) {
            buf.clear();
            return Ok(None);
        }

        let len = buf.len();
        buf.clear();
        Err(DecodeError::PartialFrame { len })
    }
}

impl Encoder<Bytes> for NulDelimitedCodec {
    type Error = std::io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(payload.len() + 1);
        dst.put(payload);
        dst.put_u8(DELIMITER);
        Ok(())
    }
}
