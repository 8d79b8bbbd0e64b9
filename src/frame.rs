//! Length-delimited framing for the submit protocol.
//!
//! A frame is a 4-byte big-endian total length followed by the frame body.
//! The length counts itself, so the smallest well-formed frame declares 5
//! bytes: the header plus a one-byte body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::errors::ProtocolError;

const HEADER_LEN: usize = 4;

/// Upper bound on one whole frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Codec turning a byte stream into frame bodies and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let total = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if total <= HEADER_LEN || total > MAX_FRAME_LEN {
            return Err(ProtocolError::BadFrameLength(total));
        }
        if src.len() < total {
            // Spares the read loop a reallocation while the rest arrives.
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(total - HEADER_LEN).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let total = HEADER_LEN + body.len();
        if body.is_empty() || total > MAX_FRAME_LEN {
            return Err(ProtocolError::BadFrameLength(total));
        }
        dst.reserve(total);
        dst.put_u32(total as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
