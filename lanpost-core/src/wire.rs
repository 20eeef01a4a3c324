//! Framing and envelope codec.
//!
//! Two framings share one decoder: the `||END_MSG||` sentinel that deployed peers speak (the
//! default) and an opt-in 4-byte big-endian length prefix, which tolerates any payload. The
//! record inside a frame is always a UTF-8 JSON [`Envelope`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::Envelope;

const LEN_SIZE: usize = 4;

/// Frame terminator of the sentinel framing.
pub const SENTINEL: &[u8] = b"||END_MSG||";

/// Largest frame (or buffered residue in sentinel mode) the decoder will hold.
pub const MAX_FRAME_LEN: usize = 128 * 1024 * 1024; // 128 MiB

/// How frames are delimited on the byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    LengthPrefixed,
    #[default]
    Sentinel,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::LengthPrefixed => f.write_str("length-prefixed"),
            Framing::Sentinel => f.write_str("sentinel"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length-prefixed" | "length" => Ok(Framing::LengthPrefixed),
            "sentinel" | "legacy" => Ok(Framing::Sentinel),
            other => Err(format!("unknown framing: {other}")),
        }
    }
}

/// Encode an envelope as JSON and frame it.
pub fn encode_frame(envelope: &Envelope, framing: Framing) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(envelope)?;
    frame_payload(&payload, framing)
}

/// Frame an already-serialized record.
pub fn frame_payload(payload: &[u8], framing: Framing) -> Result<Vec<u8>, FrameEncodeError> {
    match framing {
        Framing::LengthPrefixed => {
            if payload.len() > MAX_FRAME_LEN {
                return Err(FrameEncodeError::TooLarge);
            }
            let len = payload.len() as u32;
            let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(payload);
            Ok(out)
        }
        Framing::Sentinel => {
            if find(payload, SENTINEL).is_some() {
                return Err(FrameEncodeError::SentinelInPayload);
            }
            let mut out = Vec::with_capacity(payload.len() + SENTINEL.len());
            out.extend_from_slice(payload);
            out.extend_from_slice(SENTINEL);
            Ok(out)
        }
    }
}

/// Error encoding an envelope into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
    #[error("payload contains the frame sentinel")]
    SentinelInPayload,
}

/// Parse one frame's bytes into an envelope.
pub fn decode_envelope(frame: &[u8]) -> Result<Envelope, EnvelopeError> {
    let text = std::str::from_utf8(frame)?;
    Ok(serde_json::from_str(text.trim())?)
}

/// Error decoding a frame's record. The frame is dropped; the stream carries on.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Non-fatal irregularity seen while framing. Reported so the caller can log it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame of {0} bytes exceeds limit; skipping it")]
    TooLarge(usize),
    #[error("{0} bytes buffered without a terminator; discarding them")]
    Overflow(usize),
}

/// Per-connection stream reassembler. Feed it chunks as they arrive; it hands back whole frames.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_frame_len: usize,
    buf: Vec<u8>,
    skip: usize,
    /// Sentinel mode: bytes of `buf` already searched without finding a terminator.
    scanned: usize,
}

/// Frames completed by one [`FrameDecoder::push`], plus anything odd seen on the way.
#[derive(Debug, Default)]
pub struct Decoded {
    pub frames: Vec<Vec<u8>>,
    pub errors: Vec<FrameDecodeError>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self::with_limit(framing, MAX_FRAME_LEN)
    }

    pub fn with_limit(framing: Framing, max_frame_len: usize) -> Self {
        Self {
            framing,
            max_frame_len,
            buf: Vec::new(),
            skip: 0,
            scanned: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and return every frame it completes. Blank frames are dropped silently.
    pub fn push(&mut self, chunk: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        let chunk = self.consume_skip(chunk);
        self.buf.extend_from_slice(chunk);
        match self.framing {
            Framing::LengthPrefixed => self.drain_length_prefixed(&mut out),
            Framing::Sentinel => self.drain_sentinel(&mut out),
        }
        out
    }

    fn consume_skip<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        if self.skip == 0 {
            return chunk;
        }
        let n = self.skip.min(chunk.len());
        self.skip -= n;
        &chunk[n..]
    }

    fn drain_length_prefixed(&mut self, out: &mut Decoded) {
        let mut start = 0usize;
        loop {
            let rest = &self.buf[start..];
            if rest.len() < LEN_SIZE {
                break;
            }
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if len > self.max_frame_len {
                out.errors.push(FrameDecodeError::TooLarge(len));
                let available = rest.len() - LEN_SIZE;
                if available >= len {
                    start += LEN_SIZE + len;
                    continue;
                }
                self.skip = len - available;
                start = self.buf.len();
                break;
            }
            if rest.len() < LEN_SIZE + len {
                break;
            }
            let frame = &rest[LEN_SIZE..LEN_SIZE + len];
            if !is_blank(frame) {
                out.frames.push(frame.to_vec());
            }
            start += LEN_SIZE + len;
        }
        self.buf.drain(..start);
    }

    fn drain_sentinel(&mut self, out: &mut Decoded) {
        let mut start = 0usize;
        // a terminator may straddle the previous scan's end
        let mut from = self.scanned.saturating_sub(SENTINEL.len() - 1);
        while let Some(pos) = find(&self.buf[from..], SENTINEL) {
            let end = from + pos;
            let frame = &self.buf[start..end];
            if !is_blank(frame) {
                out.frames.push(frame.to_vec());
            }
            start = end + SENTINEL.len();
            from = start;
        }
        self.buf.drain(..start);
        if self.buf.len() > self.max_frame_len {
            out.errors.push(FrameDecodeError::Overflow(self.buf.len()));
            // keep a possible partial sentinel so the next frame still lines up
            let keep = SENTINEL.len() - 1;
            let cut = self.buf.len().saturating_sub(keep);
            self.buf.drain(..cut);
        }
        self.scanned = self.buf.len();
    }
}

fn is_blank(frame: &[u8]) -> bool {
    frame.iter().all(u8::is_ascii_whitespace)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
