use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_u16_buffer, ByteReader};
use crate::protocol::body::negotiate::expect_structure_size;
use crate::protocol::body::security_mode::SecurityMode;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct SessionFlags: u16 {
        const IS_GUEST     = 0x01;
        const IS_NULL      = 0x02;
        const ENCRYPT_DATA = 0x04;
    }
}

/// One leg of the authentication handshake. The security buffer is opaque
/// to the dialog engine and interpreted by the auth collaborator.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBSessionSetupRequest {
    pub security_mode: SecurityMode,
    pub previous_session_id: u64,
    pub security_buffer: Vec<u8>,
}

impl SMBSessionSetupRequest {
    pub fn new(security_mode: SecurityMode, security_buffer: Vec<u8>) -> Self {
        Self {
            security_mode,
            previous_session_id: 0,
            security_buffer,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(26 + self.security_buffer.len());
        out.extend_from_slice(&25u16.to_le_bytes());
        out.push(0);
        out.push(self.security_mode.bits() as u8);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&self.previous_session_id.to_le_bytes());
        put_u16_buffer(&mut out, &self.security_buffer);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 25)?;
        reader.skip(1)?;
        let security_mode = SecurityMode::from_bits_truncate(reader.read_u8()? as u16);
        reader.skip(8)?;
        let previous_session_id = reader.read_u64()?;
        let security_buffer = reader.read_u16_buffer()?;
        Ok(Self {
            security_mode,
            previous_session_id,
            security_buffer,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBSessionSetupResponse {
    pub session_flags: SessionFlags,
    pub security_buffer: Vec<u8>,
}

impl SMBSessionSetupResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.security_buffer.len());
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&self.session_flags.bits().to_le_bytes());
        put_u16_buffer(&mut out, &self.security_buffer);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 9)?;
        let session_flags = SessionFlags::from_bits_truncate(reader.read_u16()?);
        let security_buffer = reader.read_u16_buffer()?;
        Ok(Self {
            session_flags,
            security_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_setup_round_trip() {
        let request = SMBSessionSetupRequest::new(SecurityMode::SIGNING_ENABLED, vec![0xAA; 32]);
        assert_eq!(SMBSessionSetupRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBSessionSetupResponse {
            session_flags: SessionFlags::ENCRYPT_DATA,
            security_buffer: vec![],
        };
        assert_eq!(SMBSessionSetupResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
