//! Newline-delimited JSON framing.
//!
//! Each message is a single JSON object followed by `\n`. Frames larger than
//! the negotiated maximum are rejected in both directions; an oversized frame
//! is never truncated or reassembled.

use std::io::{self, BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Framing errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of at least {size} bytes exceeds maximum message size {max}")]
    TooLarge { size: usize, max: usize },

    #[error("connection closed mid-frame after {received} bytes")]
    Truncated { received: usize },

    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize `message` and write it as one frame.
pub fn write_frame<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
    max_bytes: usize,
) -> Result<(), FrameError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > max_bytes {
        return Err(FrameError::TooLarge { size: bytes.len(), max: max_bytes });
    }
    writer.write_all(&bytes)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads size-bounded frames from a buffered stream.
pub struct FrameReader<R> {
    inner: R,
    max_bytes: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(inner: R, max_bytes: usize) -> Self {
        Self {
            inner,
            max_bytes,
            buf: Vec::new(),
        }
    }

    /// Read the next raw frame without its terminator.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub fn read_frame(&mut self) -> Result<Option<&[u8]>, FrameError> {
        self.buf.clear();
        let limit = self.max_bytes as u64 + 1;
        let read = (&mut self.inner).take(limit).read_until(b'\n', &mut self.buf)?;

        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
            return Ok(Some(&self.buf));
        }

        if self.buf.len() as u64 == limit {
            return Err(FrameError::TooLarge { size: self.buf.len(), max: self.max_bytes });
        }

        Err(FrameError::Truncated { received: self.buf.len() })
    }

    /// Read and decode the next frame.
    pub fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        match self.read_frame()? {
            Some(frame) => Ok(Some(serde_json::from_slice(frame)?)),
            None => Ok(None),
        }
    }
}
