//! Length-prefixed frame codec.
//!
//! One frame on the wire is an 8-byte unsigned big-endian length `N` followed
//! by exactly `N` bytes of ciphertext. The codec hands a frame downstream only
//! once all `N` bytes have accumulated; partial frames never reach the decrypt
//! step, no matter how the transport fragments its reads.

use crate::error::{constants, RelayError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Default ceiling for a single frame's ciphertext (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Tokio codec producing/consuming whole ciphertext frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u64::from_be_bytes(prefix);

        let length = usize::try_from(length).map_err(|_| RelayError::OversizedFrame(usize::MAX))?;
        if length > self.max_frame_size {
            return Err(RelayError::OversizedFrame(length));
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            // Reserve the rest up front so the reassembly loop does not
            // reallocate once per read.
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(RelayError::Framing(
                constants::ERR_STREAM_CLOSED_MID_FRAME.to_string(),
            )),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(RelayError::OversizedFrame(item.len()));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u64(item.len() as u64);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new()
            .encode(Bytes::copy_from_slice(payload), &mut buf)
            .expect("encode");
        buf
    }

    #[test]
    fn roundtrip_single_frame() {
        let mut buf = encode_frame(b"ciphertext bytes");
        let frame = FrameCodec::new().decode(&mut buf).expect("decode");
        assert_eq!(frame.as_deref(), Some(b"ciphertext bytes".as_slice()));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_prefix() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8; LENGTH_PREFIX_SIZE - 1][..]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
    }

    #[test]
    fn decode_waits_for_full_body() {
        let mut codec = FrameCodec::new();
        let full = encode_frame(b"split across reads");
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(&full[full.len() - 1..]);
        let frame = codec.decode(&mut buf).expect("decode");
        assert_eq!(frame.as_deref(), Some(b"split across reads".as_slice()));
    }

    #[test]
    fn byte_at_a_time_reassembly() {
        let mut codec = FrameCodec::new();
        let full = encode_frame(b"one byte per read");
        let mut buf = BytesMut::new();

        for (i, byte) in full.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let decoded = codec.decode(&mut buf).expect("decode");
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "frame surfaced early at byte {i}");
            } else {
                assert_eq!(decoded.as_deref(), Some(b"one byte per read".as_slice()));
            }
        }
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut codec = FrameCodec::new();
        let mut buf = encode_frame(b"first");
        buf.extend_from_slice(&encode_frame(b"second"));

        let first = codec.decode(&mut buf).expect("decode");
        assert_eq!(first.as_deref(), Some(b"first".as_slice()));
        let second = codec.decode(&mut buf).expect("decode");
        assert_eq!(second.as_deref(), Some(b"second".as_slice()));
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut codec = FrameCodec::with_max_frame_size(64);
        let mut buf = BytesMut::new();
        buf.put_u64(65);
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(RelayError::OversizedFrame(65))
        ));
    }

    #[test]
    fn eof_mid_frame_is_framing_error() {
        let mut codec = FrameCodec::new();
        let full = encode_frame(b"truncated by peer");
        let mut buf = BytesMut::from(&full[..full.len() - 3]);

        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(RelayError::Framing(_))
        ));
    }

    #[test]
    fn eof_at_frame_boundary_is_clean() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).expect("decode_eof").is_none());
    }
}
