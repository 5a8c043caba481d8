//! Container log stream framing.
//!
//! Without a TTY the engine multiplexes stdout and stderr into one byte
//! stream. Every frame is an 8-byte header followed by its payload:
//!
//! ```text
//! [stream: u8][0u8; 3][len: u32 big-endian][payload; len]
//! ```
//!
//! Frames are cut by the declared length only. Payload bytes, newlines
//! included, are never inspected.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("unknown stream type {0} in frame header")]
    UnknownStream(u8),

    #[error("truncated frame: header declares {declared} payload bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("truncated frame header: {0} of 8 bytes")]
    TruncatedHeader(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(byte: u8) -> Result<Self, DemuxError> {
        match byte {
            0 => Ok(StreamKind::Stdin),
            1 => Ok(StreamKind::Stdout),
            2 => Ok(StreamKind::Stderr),
            other => Err(DemuxError::UnknownStream(other)),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub stream: StreamKind,
    pub payload: Bytes,
}

impl LogFrame {
    pub fn new(stream: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

/// Upper bound on buffer growth ahead of a partially received frame
const MAX_RESERVE: usize = 64 * 1024;

/// Codec for the multiplexed log stream
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCodec;

impl Decoder for LogCodec {
    type Item = LogFrame;
    type Error = DemuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogFrame>, DemuxError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let stream = StreamKind::from_byte(src[0])?;
        let declared = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        if src.len() < HEADER_LEN + declared {
            // The declared length is untrusted until the payload arrives
            let missing = HEADER_LEN + declared - src.len();
            src.reserve(missing.min(MAX_RESERVE));
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(declared).freeze();
        Ok(Some(LogFrame { stream, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LogFrame>, DemuxError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None if src.len() < HEADER_LEN => Err(DemuxError::TruncatedHeader(src.len())),
            None => Err(DemuxError::Truncated {
                declared: u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize,
                available: src.len() - HEADER_LEN,
            }),
        }
    }
}

impl Encoder<LogFrame> for LogCodec {
    type Error = DemuxError;

    fn encode(&mut self, frame: LogFrame, dst: &mut BytesMut) -> Result<(), DemuxError> {
        let len = u32::try_from(frame.payload.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame payload over 4GiB")
        })?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.stream.as_byte());
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Output of one container, split by stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demuxed {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// stdout and stderr interleaved in arrival order
    pub combined: Vec<u8>,
}

impl Demuxed {
    pub fn combined_text(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }
}

/// Split a complete multiplexed log stream. A trailing partial frame is an
/// error, never silently dropped.
pub fn demultiplex(raw: &[u8]) -> Result<Demuxed, DemuxError> {
    let mut codec = LogCodec;
    let mut buf = BytesMut::from(raw);
    let mut out = Demuxed::default();

    while let Some(frame) = codec.decode_eof(&mut buf)? {
        match frame.stream {
            StreamKind::Stdout => out.stdout.extend_from_slice(&frame.payload),
            StreamKind::Stderr => out.stderr.extend_from_slice(&frame.payload),
            StreamKind::Stdin => continue,
        }
        out.combined.extend_from_slice(&frame.payload);
    }

    Ok(out)
}
