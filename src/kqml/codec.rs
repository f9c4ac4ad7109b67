//! Newline framing for KQML socket streams.
//!
//! Every performative travels as one `\n`-terminated UTF-8 line. A bad line
//! (longer than [`MAX_LINE_BYTES`], or not UTF-8) must cost the peer that one
//! message and nothing more, so the decoder never fails the stream for it:
//! each frame is itself a [`Line`], and only transport errors end a
//! `FramedRead`.
//!
//! ```rust,ignore
//! let mut lines = FramedRead::new(read_half, KqmlCodec::new());
//! while let Some(frame) = lines.next().await {
//!     match frame? {
//!         Ok(text) => handle(&text),
//!         Err(bad) => warn!(%bad, "skipping line"),
//!     }
//! }
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum line length accepted by the decoder: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded frame: the line text, or why the line was rejected.
pub type Line = std::result::Result<String, AppError>;

/// Newline-framed codec for performative strings.
///
/// While a line is over the limit its bytes are dropped as they arrive; once
/// its newline shows up the decoder yields a single
/// `Err(AppError::MalformedMessage(..))` frame for it and carries on with the
/// next line.
#[derive(Debug, Default)]
pub struct KqmlCodec {
    /// Bytes of `src` already searched for a newline.
    scanned: usize,
    /// Inside an over-long line whose bytes are being dropped.
    discarding: bool,
}

impl KqmlCodec {
    /// Create a codec with the [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_discard(&mut self) -> Line {
        self.discarding = false;
        Err(too_long())
    }
}

impl Decoder for KqmlCodec {
    type Item = Line;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>> {
        let start = self.scanned.min(src.len());
        let newline = src[start..].iter().position(|b| *b == b'\n');
        let Some(offset) = newline else {
            if self.discarding || src.len() > MAX_LINE_BYTES {
                self.discarding = true;
                src.clear();
                self.scanned = 0;
            } else {
                self.scanned = src.len();
            }
            return Ok(None);
        };

        let end = start + offset;
        self.scanned = 0;
        let frame = src.split_to(end + 1);
        if self.discarding || end > MAX_LINE_BYTES {
            return Ok(Some(self.finish_discard()));
        }
        Ok(Some(text_of(&frame[..end])))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if self.discarding {
            src.clear();
            return Ok(Some(self.finish_discard()));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(text_of(&rest)))
    }
}

impl Encoder<String> for KqmlCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Line text without a trailing `\r`.
fn text_of(raw: &[u8]) -> Line {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|err| AppError::MalformedMessage(format!("line is not valid utf-8: {err}")))
}

fn too_long() -> AppError {
    AppError::MalformedMessage(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
}
