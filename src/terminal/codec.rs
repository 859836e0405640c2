//! UTF-8 chunk codec for the wrapper's stdout and stderr.
//!
//! The wrapper relays raw terminal bytes without any framing, so chunk
//! boundaries are arbitrary. [`Utf8ChunkCodec`] yields every complete UTF-8
//! prefix as soon as it arrives and holds back a trailing partial sequence
//! until the rest of it is read, so multi-byte characters are never split.
//! Bytes that can never form valid UTF-8 are replaced with `U+FFFD`.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use queue_autopilot::terminal::codec::Utf8ChunkCodec;
//!
//! let reader = FramedRead::new(child_stdout, Utf8ChunkCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Decoder yielding lossless UTF-8 text chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8ChunkCodec;

impl Utf8ChunkCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        let take = match std::str::from_utf8(src) {
            Ok(_) => src.len(),
            // Incomplete trailing sequence: emit what is valid, keep the rest.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Invalid bytes: emit through them so the stream keeps moving.
            Err(err) => err.valid_up_to() + err.error_len().unwrap_or(1),
        };
        if take == 0 {
            return Ok(None);
        }
        let chunk = src.split_to(take);
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(chunk) => Ok(Some(chunk)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.split_to(src.len());
                Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
            }
        }
    }
}
