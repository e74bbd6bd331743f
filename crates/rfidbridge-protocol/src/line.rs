//! Carriage-return line framing.
//!
//! Both wire protocols this bridge speaks — the reader units and the
//! library backend — terminate every message with `\r`. `LineCodec`
//! extracts complete lines from the TCP byte stream and appends the
//! terminator on the way out.

use bytes::{BufMut, BytesMut};
use rfidbridge_core::{Error, Result};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length in bytes.
///
/// No legitimate reader or backend message comes close to this; longer
/// unterminated input indicates a broken or hostile peer.
const DEFAULT_MAX_LINE: usize = 8 * 1024;

/// Tokio codec for `\r`-terminated text lines.
///
/// Decoded lines have the terminator stripped. Partial lines stay
/// buffered until the terminator arrives; multiple lines in one read
/// are decoded one per `decode` call.
#[derive(Debug)]
pub struct LineCodec {
    max_line: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        LineCodec {
            max_line: DEFAULT_MAX_LINE,
        }
    }

    /// Create a codec with a custom maximum line length.
    pub fn with_max_line(max_line: usize) -> Self {
        LineCodec { max_line }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let Some(pos) = src.iter().position(|&b| b == b'\r') else {
            if src.len() > self.max_line {
                return Err(Error::FrameTooLarge {
                    size: src.len(),
                    max_size: self.max_line,
                });
            }
            return Ok(None);
        };

        if pos > self.max_line {
            return Err(Error::FrameTooLarge {
                size: pos,
                max_size: self.max_line,
            });
        }

        let line = src.split_to(pos + 1);
        let line = &line[..pos];
        let text = std::str::from_utf8(line)
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?
            .to_string();
        Ok(Some(text))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let line = item.as_ref();
        if line.len() + 1 > self.max_line {
            return Err(Error::FrameTooLarge {
                size: line.len() + 1,
                max_size: self.max_line,
            });
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\r');
        Ok(())
    }
}
