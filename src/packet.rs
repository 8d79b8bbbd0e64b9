//! Typed packets carried inside frame bodies.
//!
//! The first byte of a body is the command, the rest belongs to it. Replies
//! use the request command with the high bit set. Submit bodies open with a
//! fixed 8-byte ASCII request id.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::errors::ProtocolError;

pub const CMD_SUBMIT: u8 = 0x02;
pub const CMD_SUBMIT_ACK: u8 = 0x82;

/// Width of the request id field.
pub const ID_LEN: usize = 8;

/// Ack result for a request that was accepted and processed.
pub const RESULT_OK: u8 = 0;
/// Ack result for a request turned away because no worker was idle.
pub const RESULT_BUSY: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client request carrying an opaque payload.
    Submit { id: String, payload: Bytes },
    /// Server reply to a submit.
    SubmitAck { id: String, result: u8 },
}

impl Packet {
    pub fn decode(mut body: Bytes) -> Result<Packet, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::Truncated);
        }
        let cmd = body.get_u8();
        match cmd {
            CMD_SUBMIT => {
                let id = take_id(&mut body)?;
                Ok(Packet::Submit { id, payload: body })
            }
            CMD_SUBMIT_ACK => {
                let id = take_id(&mut body)?;
                if body.is_empty() {
                    return Err(ProtocolError::Truncated);
                }
                let result = body.get_u8();
                Ok(Packet::SubmitAck { id, result })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Packet::Submit { id, payload } => {
                let mut buf = BytesMut::with_capacity(1 + ID_LEN + payload.len());
                buf.put_u8(CMD_SUBMIT);
                buf.extend_from_slice(id_field(id)?);
                buf.extend_from_slice(payload);
                Ok(buf.freeze())
            }
            Packet::SubmitAck { id, result } => {
                let mut buf = BytesMut::with_capacity(1 + ID_LEN + 1);
                buf.put_u8(CMD_SUBMIT_ACK);
                buf.extend_from_slice(id_field(id)?);
                buf.put_u8(*result);
                Ok(buf.freeze())
            }
        }
    }
}

fn take_id(body: &mut Bytes) -> Result<String, ProtocolError> {
    if body.len() < ID_LEN {
        return Err(ProtocolError::Truncated);
    }
    let raw = body.split_to(ID_LEN);
    match std::str::from_utf8(&raw) {
        Ok(id) => Ok(id.to_owned()),
        Err(_) => Err(ProtocolError::BadRequestId),
    }
}

fn id_field(id: &str) -> Result<&[u8], ProtocolError> {
    if id.len() == ID_LEN {
        Ok(id.as_bytes())
    } else {
        Err(ProtocolError::BadRequestId)
    }
}
