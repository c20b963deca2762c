use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut, Bytes};
use md5::{Digest, Md5};

/// 4 bytes of big-endian sequence number followed by 4 bytes of integrity tag
pub const FRAME_HEADER_SIZE: usize = 8;

/// sequence number of the first frame a sender emits and a receiver expects
pub const INITIAL_SEQUENCE: u32 = 1;

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("datagram of {len} bytes is shorter than the 8 byte frame header")]
    TooSmall { len: usize },
}

/// Truncated MD5 over the sequence number (big endian) and the payload. This detects corruption
///  and mismatched frames, it does *not* authenticate the sender.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct IntegrityTag(pub [u8; 4]);
impl Debug for IntegrityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", u32::from_be_bytes(self.0))
    }
}
impl IntegrityTag {
    pub fn new(sequence: u32, payload: &[u8]) -> IntegrityTag {
        let mut md5 = Md5::new();
        md5.update(sequence.to_be_bytes());
        md5.update(payload);
        let digest = md5.finalize();

        let mut tag = [0u8; 4];
        tag.copy_from_slice(&digest[..4]);
        IntegrityTag(tag)
    }
}

/// A decoded frame as it was received. The tag is the one found on the wire, it is not verified
///  during decoding.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<'a> {
    pub sequence: u32,
    pub tag: IntegrityTag,
    pub payload: &'a [u8],
}

/// Builds frames with a zero-filled payload - only size and sequencing matter for a throughput
///  test. The buffer is allocated once, encoding a frame only overwrites its header.
pub struct FrameEncoder {
    buf: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(payload_size: usize) -> FrameEncoder {
        FrameEncoder {
            buf: vec![0u8; FRAME_HEADER_SIZE + payload_size],
        }
    }

    pub fn encode(&mut self, sequence: u32) -> &[u8] {
        let tag = IntegrityTag::new(sequence, &self.buf[FRAME_HEADER_SIZE..]);

        let mut header: &mut [u8] = &mut self.buf[..FRAME_HEADER_SIZE];
        header.put_u32(sequence);
        header.put_slice(&tag.0);

        &self.buf
    }

    /// the most recently encoded frame
    pub fn frame(&self) -> &[u8] {
        &self.buf
    }
}

/// Builds a single frame with a zero-filled payload of `payload_size` bytes
pub fn encode(sequence: u32, payload_size: usize) -> Bytes {
    Bytes::copy_from_slice(FrameEncoder::new(payload_size).encode(sequence))
}

pub fn decode(raw: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if raw.len() < FRAME_HEADER_SIZE {
        return Err(DecodeError::TooSmall { len: raw.len() });
    }

    let mut buf = raw;
    let sequence = buf.get_u32();
    let mut tag = [0u8; 4];
    buf.copy_to_slice(&mut tag);

    Ok(Frame {
        sequence,
        tag: IntegrityTag(tag),
        payload: buf,
    })
}
