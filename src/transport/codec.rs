//! CRLF line framing for IRC.
//!
//! The decoder accumulates raw bytes, yields complete lines with the
//! terminator stripped, and retains any partial tail for the next read.
//! Oversized lines are a protocol violation: dropped and logged, never
//! fatal.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::ProtocolError;

/// Maximum length of one line including tags, per the IRCv3 message-tags
/// extended allowance.
pub const MAX_IRC_LINE_LEN: usize = 8191;

/// Line codec over a byte stream.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Scan resume point, so unscanned bytes are not rescanned.
    next_index: usize,
    /// Inside an oversized line, skipping until its terminator.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> LineCodec {
        LineCodec::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|off| self.next_index + off);

            match newline {
                Some(index) => {
                    self.next_index = 0;
                    if self.discarding {
                        buf.advance(index + 1);
                        self.discarding = false;
                        continue;
                    }
                    // `index` counts the `\r` when present, hence the +1.
                    if index > MAX_IRC_LINE_LEN + 1 {
                        warn!(len = index, "dropping oversized line");
                        buf.advance(index + 1);
                        continue;
                    }
                    let mut line = buf.split_to(index + 1);
                    line.truncate(line.len() - 1);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                None => {
                    if self.discarding {
                        buf.clear();
                        self.next_index = 0;
                    } else if buf.len() > MAX_IRC_LINE_LEN + 1 {
                        warn!(len = buf.len(), "dropping oversized line");
                        self.discarding = true;
                        buf.clear();
                        self.next_index = 0;
                    } else {
                        self.next_index = buf.len();
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if line.len() > MAX_IRC_LINE_LEN {
            return Err(ProtocolError::LineTooLong(line.len()));
        }
        buf.reserve(line.len() + 2);
        buf.put_slice(line.as_bytes());
        if !line.ends_with("\r\n") {
            buf.put_slice(b"\r\n");
        }
        Ok(())
    }
}
