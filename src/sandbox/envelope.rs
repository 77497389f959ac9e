//! Length-prefixed message envelopes used by the in-sandbox process API.
//!
//! Each frame is one flag byte, a big-endian `u32` payload length, then the
//! payload. The last frame of a response stream carries [`END_STREAM`].

use super::SandboxError;

pub const END_STREAM: u8 = 0x02;
const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn is_end_stream(&self) -> bool {
        self.flags & END_STREAM != 0
    }
}

pub fn encode(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(flags);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a fully buffered response body into frames.
pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Envelope>, SandboxError> {
    let mut frames = Vec::new();

    while !buf.is_empty() {
        if buf.len() < HEADER_LEN {
            return Err(SandboxError::Protocol(format!(
                "truncated envelope header ({} bytes)",
                buf.len()
            )));
        }
        let flags = buf[0];
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        let rest = &buf[HEADER_LEN..];
        if rest.len() < len {
            return Err(SandboxError::Protocol(format!(
                "truncated envelope payload: expected {} bytes, got {}",
                len,
                rest.len()
            )));
        }
        frames.push(Envelope {
            flags,
            payload: rest[..len].to_vec(),
        });
        buf = &rest[len..];
    }

    Ok(frames)
}
