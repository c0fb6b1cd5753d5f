use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBParseResult;

use crate::byte_helper::ByteReader;
use crate::protocol::header::command_code::SMBCommandCode;
use crate::protocol::header::flags::SMBFlags;

pub const SMB2_HEADER_LENGTH: usize = 64;
pub const SMB2_PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// Reserved "no correlation" message identifier: never matched against the
/// pending-exchange table ([MS-SMB2] 3.2.5.1.2).
pub const NO_CORRELATION_ID: u64 = u64::MAX;

/// The 64-byte SMB2 message header ([MS-SMB2] 2.2.1.2).
///
/// Async headers reuse the reserved/tree-id range for a 64-bit async id; the
/// `ASYNC_COMMAND` flag selects which interpretation is on the wire.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBHeader {
    pub credit_charge: u16,
    pub status: NTStatus,
    pub command: SMBCommandCode,
    pub credits: u16,
    pub flags: SMBFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub async_id: u64,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl SMBHeader {
    pub fn request(command: SMBCommandCode, message_id: u64, session_id: u64, tree_id: u32) -> Self {
        Self {
            credit_charge: 0,
            status: NTStatus::Success,
            command,
            credits: 0,
            flags: SMBFlags::empty(),
            next_command: 0,
            message_id,
            tree_id,
            async_id: 0,
            session_id,
            signature: [0; 16],
        }
    }

    /// Response header correlated to this request: same command, message id,
    /// tree and session ids, with the response flag set and the given status
    /// and credit grant.
    pub fn create_response_header(&self, status: NTStatus, credits_granted: u16) -> Self {
        Self {
            credit_charge: self.credit_charge,
            status,
            command: self.command,
            credits: credits_granted,
            flags: SMBFlags::SERVER_TO_REDIR,
            next_command: 0,
            message_id: self.message_id,
            tree_id: self.tree_id,
            async_id: 0,
            session_id: self.session_id,
            signature: [0; 16],
        }
    }

    /// Interim response for a request that will complete asynchronously:
    /// STATUS_PENDING with the async flag and an async id in place of the
    /// tree id.
    pub fn create_interim_response(&self, async_id: u64, credits_granted: u16) -> Self {
        let mut header = self.create_response_header(NTStatus::Pending, credits_granted);
        header.flags |= SMBFlags::ASYNC_COMMAND;
        header.tree_id = 0;
        header.async_id = async_id;
        header
    }

    pub fn is_response(&self) -> bool {
        self.flags.is_response()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SMB2_HEADER_LENGTH);
        out.extend_from_slice(&SMB2_PROTOCOL_ID);
        out.extend_from_slice(&(SMB2_HEADER_LENGTH as u16).to_le_bytes());
        out.extend_from_slice(&self.credit_charge.to_le_bytes());
        out.extend_from_slice(&(self.status as u32).to_le_bytes());
        out.extend_from_slice(&(self.command as u16).to_le_bytes());
        out.extend_from_slice(&self.credits.to_le_bytes());
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&self.next_command.to_le_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        if self.flags.is_async() {
            out.extend_from_slice(&self.async_id.to_le_bytes());
        } else {
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&self.tree_id.to_le_bytes());
        }
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn parse(input: &[u8]) -> SMBParseResult<Self> {
        let mut reader = ByteReader::new(input);
        let magic = reader.read_array::<4>()?;
        if magic != SMB2_PROTOCOL_ID {
            return Err(SMBError::protocol_violation("missing SMB2 protocol id"));
        }
        let structure_size = reader.read_u16()?;
        if structure_size as usize != SMB2_HEADER_LENGTH {
            return Err(SMBError::protocol_violation(format!(
                "unexpected header structure size {}",
                structure_size
            )));
        }
        let credit_charge = reader.read_u16()?;
        let raw_status = reader.read_u32()?;
        let status = NTStatus::try_from_primitive(raw_status).map_err(|_| {
            SMBError::protocol_violation(format!("unknown status code {:#010x}", raw_status))
        })?;
        let raw_command = reader.read_u16()?;
        let command = SMBCommandCode::try_from_primitive(raw_command).map_err(|_| {
            SMBError::protocol_violation(format!("unknown command code {:#06x}", raw_command))
        })?;
        let credits = reader.read_u16()?;
        let flags = SMBFlags::from_bits_truncate(reader.read_u32()?);
        let next_command = reader.read_u32()?;
        let message_id = reader.read_u64()?;
        let (tree_id, async_id) = if flags.is_async() {
            (0, reader.read_u64()?)
        } else {
            reader.skip(4)?;
            (reader.read_u32()?, 0)
        };
        let session_id = reader.read_u64()?;
        let signature = reader.read_array::<16>()?;
        Ok((
            reader.remaining(),
            Self {
                credit_charge,
                status,
                command,
                credits,
                flags,
                next_command,
                message_id,
                tree_id,
                async_id,
                session_id,
                signature,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_sync_header() {
        let mut header = SMBHeader::request(SMBCommandCode::TreeConnect, 42, 0x1122, 7);
        header.credit_charge = 3;
        header.credits = 16;
        header.signature = [0xAB; 16];
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), SMB2_HEADER_LENGTH);
        let (remaining, parsed) = SMBHeader::parse(&bytes).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(parsed, header);
    }

    #[test]
    fn round_trip_async_header() {
        let request = SMBHeader::request(SMBCommandCode::ChangeNotify, 9, 5, 3);
        let interim = request.create_interim_response(0xAA55, 1);
        let bytes = interim.as_bytes();
        let (_, parsed) = SMBHeader::parse(&bytes).unwrap();
        assert!(parsed.flags.is_async());
        assert_eq!(parsed.async_id, 0xAA55);
        assert_eq!(parsed.status, NTStatus::Pending);
        assert_eq!(parsed.tree_id, 0);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = SMBHeader::request(SMBCommandCode::Echo, 1, 0, 0).as_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(
            SMBHeader::parse(&bytes),
            Err(SMBError::ProtocolViolation(_))
        ));
    }
}
