//! Async box reader over the encoder output
//!
//! Reads one complete box at a time. While the encoder has not written
//! anything yet the read simply waits on the stream; only a closed stream
//! ends it. A close between boxes is a clean end, a close inside a box is
//! [`MediaError::Truncated`].

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::boxes::{BoxHeader, Mp4Box, EXTENDED_HEADER_LEN, HEADER_LEN};
use super::error::MediaError;
use crate::error::Result;

/// Largest box accepted by default (64 MiB)
pub const DEFAULT_MAX_BOX_SIZE: usize = 64 * 1024 * 1024;

/// Reads consecutive boxes from an async byte stream
#[derive(Debug)]
pub struct BoxReader<R> {
    inner: R,
    max_box_size: usize,
    position: u64,
    boxes_read: u64,
}

impl<R: AsyncRead + Unpin> BoxReader<R> {
    /// Create a reader with the default size limit
    pub fn new(inner: R) -> Self {
        Self::with_max_box_size(inner, DEFAULT_MAX_BOX_SIZE)
    }

    /// Create a reader rejecting boxes larger than `max_box_size`
    pub fn with_max_box_size(inner: R, max_box_size: usize) -> Self {
        Self {
            inner,
            max_box_size,
            position: 0,
            boxes_read: 0,
        }
    }

    /// Read the next box
    ///
    /// Returns `Ok(None)` when the stream ends on a box boundary.
    pub async fn read_box(&mut self) -> Result<Option<Mp4Box>> {
        let mut header = [0u8; EXTENDED_HEADER_LEN];

        let n = read_full(&mut self.inner, &mut header[..HEADER_LEN]).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_LEN {
            return Err(MediaError::Truncated {
                needed: HEADER_LEN,
                available: n,
            }
            .into());
        }

        let size_field = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let header_len = if BoxHeader::is_extended(size_field) {
            let n = read_full(&mut self.inner, &mut header[HEADER_LEN..]).await?;
            if n < EXTENDED_HEADER_LEN - HEADER_LEN {
                return Err(MediaError::Truncated {
                    needed: EXTENDED_HEADER_LEN - HEADER_LEN,
                    available: n,
                }
                .into());
            }
            EXTENDED_HEADER_LEN
        } else {
            HEADER_LEN
        };

        let parsed = BoxHeader::decode(&header[..header_len])?;
        if parsed.size > self.max_box_size as u64 {
            return Err(MediaError::TooLarge {
                fourcc: parsed.fourcc,
                size: parsed.size,
                limit: self.max_box_size,
            }
            .into());
        }

        let size = parsed.size as usize;
        let mut buf = BytesMut::with_capacity(size);
        buf.extend_from_slice(&header[..header_len]);
        buf.resize(size, 0);

        let needed = size - header_len;
        let n = read_full(&mut self.inner, &mut buf[header_len..]).await?;
        if n < needed {
            return Err(MediaError::Truncated {
                needed,
                available: n,
            }
            .into());
        }

        self.position += size as u64;
        self.boxes_read += 1;
        Ok(Some(Mp4Box::from_parts(parsed, buf.freeze())))
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Boxes read so far
    pub fn boxes_read(&self) -> u64 {
        self.boxes_read
    }
}

/// Fill `buf` until it is full or the stream closes; returns bytes read
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
