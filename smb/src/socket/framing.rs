use bytes::{Buf, BytesMut};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

/// Largest payload the 17-bit NetBIOS session-message length can carry.
pub const MAX_NETBIOS_PAYLOAD: usize = 0x1FFFF;

/// Largest payload the 3-byte direct-TCP length can carry once large
/// transfers are negotiated.
pub const MAX_DIRECT_TCP_PAYLOAD: usize = 0xFF_FFFF;

pub const FRAME_HEADER_LENGTH: usize = 4;

#[repr(u8)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone)]
pub enum SessionPacketType {
    SessionMessage = 0x00,
    SessionRequest = 0x81,
    PositiveSessionResponse = 0x82,
    NegativeSessionResponse = 0x83,
    RetargetSessionResponse = 0x84,
    SessionKeepAlive = 0x85,
}

/// One NetBIOS session packet: type byte, 3-byte big-endian length, payload.
/// Direct TCP uses the same frame with the type byte fixed at zero.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SessionPacket {
    pub packet_type: SessionPacketType,
    pub payload: Vec<u8>,
}

impl SessionPacket {
    pub fn message(payload: Vec<u8>) -> Self {
        Self {
            packet_type: SessionPacketType::SessionMessage,
            payload,
        }
    }

    pub fn keep_alive() -> Self {
        Self {
            packet_type: SessionPacketType::SessionKeepAlive,
            payload: Vec::new(),
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LENGTH + self.payload.len());
        out.push(self.packet_type as u8);
        let length = self.payload.len() as u32;
        out.extend_from_slice(&length.to_be_bytes()[1..]);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Reassembles session packets from a TCP byte stream. Bytes are fed in as
/// they arrive; complete packets come out in order. The size ceiling starts
/// at the NetBIOS limit and is raised after negotiation grants large
/// transfers.
pub struct FramingBuffer {
    buf: BytesMut,
    max_payload_length: usize,
}

impl Default for FramingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FramingBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(FRAME_HEADER_LENGTH + MAX_NETBIOS_PAYLOAD),
            max_payload_length: MAX_NETBIOS_PAYLOAD,
        }
    }

    /// Raises the payload ceiling, capped at what the length field can
    /// express. Never shrinks.
    pub fn grow(&mut self, max_payload_length: usize) {
        let capped = max_payload_length.min(MAX_DIRECT_TCP_PAYLOAD);
        if capped > self.max_payload_length {
            self.max_payload_length = capped;
        }
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete packet, or `None` if more bytes are needed. An unknown
    /// type byte or an oversized length poisons the stream and fails.
    pub fn take_packet(&mut self) -> SMBResult<Option<SessionPacket>> {
        if self.buf.len() < FRAME_HEADER_LENGTH {
            return Ok(None);
        }
        let packet_type = SessionPacketType::try_from(self.buf[0]).map_err(|_| {
            SMBError::framing_error(format!("unknown session packet type 0x{:02x}", self.buf[0]))
        })?;
        let length = u32::from_be_bytes([0, self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if length > self.max_payload_length {
            return Err(SMBError::framing_error(format!(
                "frame length {} exceeds the {} byte ceiling",
                length, self.max_payload_length
            )));
        }
        if self.buf.len() < FRAME_HEADER_LENGTH + length {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LENGTH);
        let payload = self.buf.split_to(length).to_vec();
        Ok(Some(SessionPacket {
            packet_type,
            payload,
        }))
    }
}
