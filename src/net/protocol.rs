//! Peer frame codec.
//!
//! Every frame starts with a 4-byte header `{magic, dst, src, cmd}` followed by
//! a command specific payload. Bytes are written explicitly, never via struct
//! layout.

use crate::error::{PropError, Result};
use crate::event::{command_enum, into_u8};

pub const MAGIC: u8 = 0xA5;
/// Destination meaning "every node".
pub const BROADCAST: u8 = 0xFF;
pub const MAX_NODE_ID: u8 = 0xFE;
pub const HEADER_LEN: usize = 4;
pub const MAX_FRAME: usize = 256;

command_enum! {
    /// Peer protocol command codes.
    pub enum Command {
        Ping = 0x00,
        ChangeMode = 0x01,
        TriggerAnim = 0x02,
    }
}

into_u8!(Command);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub dst: u8,
    pub src: u8,
    pub cmd: u8,
}

/// A parsed frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

/// Decoded meaning of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Ping,
    ChangeMode(u8),
    TriggerAnim(u8),
    /// Recognized command with a missing payload.
    Truncated(Command),
    /// Command code this node does not know; ignored for forward compatibility.
    Unknown(u8),
}

impl Frame<'_> {
    pub fn message(&self) -> Message {
        match Command::try_from(self.header.cmd) {
            Ok(Command::Ping) => Message::Ping,
            Ok(cmd @ Command::ChangeMode) => self
                .payload
                .first()
                .map_or(Message::Truncated(cmd), |&mode| Message::ChangeMode(mode)),
            Ok(cmd @ Command::TriggerAnim) => self
                .payload
                .first()
                .map_or(Message::Truncated(cmd), |&id| Message::TriggerAnim(id)),
            Err(code) => Message::Unknown(code),
        }
    }
}

/// Accept frames addressed to `my_id` or broadcast.
pub fn is_for_me(my_id: u8, dst: u8) -> bool {
    dst == my_id || dst == BROADCAST
}

/// Parse and validate a received datagram.
///
/// # Errors
/// Returns `PropError::Protocol` for short or oversized frames and a bad magic byte.
pub fn parse(buf: &[u8]) -> Result<Frame<'_>> {
    if buf.len() < HEADER_LEN {
        return Err(PropError::Protocol(format!("{} bytes, need {HEADER_LEN}", buf.len())));
    }
    if buf.len() > MAX_FRAME {
        return Err(PropError::Protocol(format!("{} bytes, max {MAX_FRAME}", buf.len())));
    }
    if buf[0] != MAGIC {
        return Err(PropError::Protocol(format!("bad magic 0x{:02X}", buf[0])));
    }

    Ok(Frame {
        header: Header {
            dst: buf[1],
            src: buf[2],
            cmd: buf[3],
        },
        payload: &buf[HEADER_LEN..],
    })
}

/// Build a frame.
///
/// # Errors
/// Returns `PropError::Protocol` if the source id is the broadcast id or the
/// payload does not fit in one frame.
pub fn encode(dst: u8, src: u8, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if src > MAX_NODE_ID {
        return Err(PropError::Protocol(format!("source id {src} out of range")));
    }
    if HEADER_LEN + payload.len() > MAX_FRAME {
        return Err(PropError::Protocol(format!(
            "payload of {} bytes does not fit",
            payload.len()
        )));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&[MAGIC, dst, src, cmd]);
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn ping(dst: u8, src: u8) -> Result<Vec<u8>> {
    encode(dst, src, Command::Ping.into(), &[])
}

pub fn change_mode(dst: u8, src: u8, mode: u8) -> Result<Vec<u8>> {
    encode(dst, src, Command::ChangeMode.into(), &[mode])
}

pub fn trigger_anim(dst: u8, src: u8, anim_id: u8) -> Result<Vec<u8>> {
    encode(dst, src, Command::TriggerAnim.into(), &[anim_id])
}
