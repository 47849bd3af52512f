//! Stream framing for envelopes.
//!
//! TCP hands us a byte stream, so every encoded envelope travels inside an
//! explicit frame:
//!
//! ```text
//! +-------------+-------------------+---------------------+
//! | version (1) | length (4, BE u32) | payload (length)   |
//! +-------------+-------------------+---------------------+
//! ```
//!
//! [`FrameDecoder`] owns the receive buffer: a frame split across several
//! reads stays buffered until complete, and several frames arriving in one
//! read are handed out one at a time.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

pub const FRAME_VERSION: u8 = 1;

/// Version byte plus the big-endian payload length.
pub const HEADER_LEN: usize = 5;

pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(FRAME_VERSION);
    frame.put_u32(payload.len() as u32);
    frame.extend_from_slice(payload);
    frame.freeze()
}

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(HEADER_LEN + max_len.min(DEFAULT_MAX_FRAME_LEN)),
            max_len,
        }
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet handed out as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Pops the next complete frame payload, if one is buffered.
    ///
    /// A frame with an unknown version is consumed before the error is
    /// returned, so the next call resumes at the following frame.
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = self.buffer[0];
        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if len > self.max_len {
            return Err(FrameError::FrameTooLarge {
                len,
                limit: self.max_len,
            });
        }

        let total = HEADER_LEN + len;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        let payload = self.buffer.split_to(len).freeze();

        if version != FRAME_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        Ok(Some(payload))
    }
}

/// Reads whole frames from an async byte stream.
///
/// `next_frame` is cancel safe: partial input lives in the decoder, so it can
/// sit in a `select!` next to other branches.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(max_len),
        }
    }

    /// Next frame payload, or `None` on a clean close between frames.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }

            let read = self.reader.read_buf(self.decoder.buffer_mut()).await?;
            if read == 0 {
                return match self.decoder.buffered() {
                    0 => Ok(None),
                    buffered => Err(FrameError::Truncated { buffered }),
                };
            }
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let frame = encode_frame(b"11:2:alice:hi");
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);

        for byte in &frame[..frame.len() - 1] {
            decoder.extend_from_slice(&[*byte]);
            assert!(decoder.decode().expect("decode").is_none());
        }
        decoder.extend_from_slice(&frame[frame.len() - 1..]);

        let payload = decoder.decode().expect("decode").expect("complete frame");
        assert_eq!(&payload[..], b"11:2:alice:hi");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn coalesced_frames_come_out_one_at_a_time() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_frame(b"12:0:alice:"));
        wire.extend_from_slice(&encode_frame(b""));
        wire.extend_from_slice(&encode_frame(b"4:0:alice:"));
        decoder.extend_from_slice(&wire);

        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"12:0:alice:");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"4:0:alice:");
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut decoder = FrameDecoder::new(8);
        decoder.extend_from_slice(&encode_frame(b"123456789"));

        let err = decoder.decode().expect_err("frame is over the limit");
        assert!(matches!(err, FrameError::FrameTooLarge { len: 9, limit: 8 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_version_is_skipped() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
        let mut bogus = BytesMut::new();
        bogus.put_u8(9);
        bogus.put_u32(3);
        bogus.extend_from_slice(b"abc");
        decoder.extend_from_slice(&bogus);
        decoder.extend_from_slice(&encode_frame(b"12:0:bob:"));

        let err = decoder.decode().expect_err("version 9 is unknown");
        assert!(matches!(err, FrameError::UnsupportedVersion(9)));
        assert!(!err.is_fatal());
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"12:0:bob:");
    }

    #[tokio::test]
    async fn reader_reports_clean_close_and_truncation() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(reader, DEFAULT_MAX_FRAME_LEN);

        write_frame(&mut writer, b"12:0:alice:").await.expect("write");
        drop(writer);
        assert!(reader.next_frame().await.expect("frame").is_some());
        assert!(reader.next_frame().await.expect("clean close").is_none());

        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(reader, DEFAULT_MAX_FRAME_LEN);
        let frame = encode_frame(b"12:0:alice:");
        writer.write_all(&frame[..7]).await.expect("write");
        drop(writer);
        assert!(matches!(
            reader.next_frame().await,
            Err(FrameError::Truncated { buffered: 7 })
        ));
    }
}
