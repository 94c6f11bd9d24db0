//! Wire frame codec
//!
//! Frames are laid out as `[dest][src][kind][payload..]`. The explicit kind
//! tag means a short data payload can never be mistaken for a control frame.

use core::fmt;

use alloc::string::String;

use bytes::{BufMut, Bytes, BytesMut};
use strum::{AsRefStr, Display};

/// Length of the fixed frame header in bytes
pub const HEADER_LEN: usize = 3;

/// Single byte node address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub u8);

impl Address {
    /// Broadcast address
    pub const BROADCAST: Address = Address(0xff);

    /// Reserved for future use, never assigned to a node
    pub const RESERVED_A: Address = Address(0xfe);

    /// Reserved for future use, never assigned to a node
    pub const RESERVED_B: Address = Address(0xfd);

    /// Check whether this is one of the reserved addresses
    pub fn is_reserved(&self) -> bool {
        matches!(*self, Self::BROADCAST | Self::RESERVED_A | Self::RESERVED_B)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Frame type tag, carried in the third header byte
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
pub enum FrameKind {
    #[strum(serialize = "RTS")]
    Rts = 1,
    #[strum(serialize = "CTS")]
    Cts = 2,
    #[strum(serialize = "ACK")]
    Ack = 3,
    #[strum(serialize = "DATA")]
    Data = 4,
}

impl FrameKind {
    /// Wire tag for this kind
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FrameKind::Rts),
            2 => Some(FrameKind::Cts),
            3 => Some(FrameKind::Ack),
            4 => Some(FrameKind::Data),
            _ => None,
        }
    }

    /// RTS, CTS and ACK are control frames
    pub fn is_control(self) -> bool {
        self != FrameKind::Data
    }
}

/// Reasons an inbound buffer is discarded without reaching the MAC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discard {
    /// Nothing was received
    Empty,
    /// Shorter than the frame header
    Truncated(usize),
    /// Our own transmission, heard back
    SelfEcho,
    /// Unrecognised kind tag
    UnknownKind(u8),
    /// Control frame carrying a payload
    Malformed,
}

/// A decoded MAC frame with owned payload
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub dest: Address,
    pub src: Address,
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    /// Build a control frame (RTS, CTS or ACK)
    pub fn control(kind: FrameKind, dest: Address, src: Address) -> Self {
        debug_assert!(kind.is_control());

        Self {
            dest,
            src,
            kind,
            payload: Bytes::new(),
        }
    }

    /// Build a data frame
    pub fn data(dest: Address, src: Address, payload: impl Into<Bytes>) -> Self {
        Self {
            dest,
            src,
            kind: FrameKind::Data,
            payload: payload.into(),
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }

    /// Encode the frame into a freshly allocated buffer
    pub fn encode(&self) -> Bytes {
        let mut buff = BytesMut::with_capacity(HEADER_LEN + self.payload.len());

        buff.put_u8(self.dest.0);
        buff.put_u8(self.src.0);
        buff.put_u8(self.kind.tag());
        buff.put_slice(&self.payload);

        buff.freeze()
    }

    /// Decode a frame, without any address filtering
    pub fn decode(buf: &[u8]) -> Result<Self, Discard> {
        if buf.is_empty() {
            return Err(Discard::Empty);
        }
        if buf.len() < HEADER_LEN {
            return Err(Discard::Truncated(buf.len()));
        }

        let kind = FrameKind::from_tag(buf[2]).ok_or(Discard::UnknownKind(buf[2]))?;
        let payload = &buf[HEADER_LEN..];

        if kind.is_control() && !payload.is_empty() {
            return Err(Discard::Malformed);
        }

        Ok(Self {
            dest: Address(buf[0]),
            src: Address(buf[1]),
            kind,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{} {}", self.src, self.dest, self.kind)?;
        if !self.is_control() {
            write!(f, " {}", String::from_utf8_lossy(&self.payload))?;
        }
        Ok(())
    }
}

/// Decode an inbound buffer for the node at `local`.
///
/// Frames sourced from `local` are our own transmissions heard back and
/// are discarded, as are empty and malformed buffers.
pub fn decode(buf: &[u8], local: Address) -> Result<Frame, Discard> {
    let frame = Frame::decode(buf)?;

    if frame.src == local {
        return Err(Discard::SelfEcho);
    }

    Ok(frame)
}
