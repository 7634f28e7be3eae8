//! Byte-stream framing for protocol lines.
//!
//! Incoming bytes are buffered and split on `\n`; a trailing `\r` is removed
//! and an unterminated tail stays in the buffer until more bytes arrive.
//! Decoding is permissive: invalid UTF-8 sequences are skipped and
//! overlong garbage is discarded, so the decoder itself never fails on
//! protocol input.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Longest line we are willing to buffer (tags included).
pub const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, Default)]
pub struct LineCodec {
    /// Index of the next byte to scan for `\n`.
    next_index: usize,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decode bytes as UTF-8, dropping undecodable sequences.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    warn!(buffered = src.len(), "discarding overlong line");
                    src.clear();
                    self.discarding = true;
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let text = decode_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text.to_string()));
        }
    }

    /// An unterminated tail at end of stream is dropped, not an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        src.clear();
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
