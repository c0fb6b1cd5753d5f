use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;
use uuid::Uuid;

use crate::byte_helper::{put_u16_buffer, ByteReader};
use crate::protocol::body::capabilities::Capabilities;
use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::filetime::FileTime;
use crate::protocol::body::security_mode::SecurityMode;

/// First request on every connection. Offers the dialects the client is
/// willing to speak; the server answers with its pick and the negotiated
/// transfer ceilings.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBNegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<SMBDialect>,
}

impl SMBNegotiateRequest {
    pub fn new(security_mode: SecurityMode, dialects: Vec<SMBDialect>) -> Self {
        let capabilities = if dialects.iter().any(SMBDialect::supports_multi_credit) {
            Capabilities::LARGE_MTU | Capabilities::ENCRYPTION
        } else {
            Capabilities::empty()
        };
        Self {
            security_mode,
            capabilities,
            client_guid: Uuid::new_v4(),
            dialects,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36 + self.dialects.len() * 2);
        out.extend_from_slice(&36u16.to_le_bytes());
        out.extend_from_slice(&(self.dialects.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.security_mode.bits().to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.capabilities.bits().to_le_bytes());
        out.extend_from_slice(&self.client_guid.to_bytes_le());
        out.extend_from_slice(&[0; 8]);
        for dialect in &self.dialects {
            out.extend_from_slice(&(*dialect as u16).to_le_bytes());
        }
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 36)?;
        let dialect_count = reader.read_u16()? as usize;
        let security_mode = SecurityMode::from_bits_truncate(reader.read_u16()?);
        reader.skip(2)?;
        let capabilities = Capabilities::from_bits_truncate(reader.read_u32()?);
        let client_guid = Uuid::from_bytes_le(reader.read_array::<16>()?);
        reader.skip(8)?;
        let mut dialects = Vec::with_capacity(dialect_count);
        for _ in 0..dialect_count {
            let raw = reader.read_u16()?;
            let dialect = SMBDialect::try_from(raw).map_err(|_| {
                SMBError::protocol_violation(format!("unknown dialect 0x{:04x} offered", raw))
            })?;
            dialects.push(dialect);
        }
        if dialects.is_empty() {
            return Err(SMBError::protocol_violation("negotiate offered no dialects"));
        }
        Ok(Self {
            security_mode,
            capabilities,
            client_guid,
            dialects,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBNegotiateResponse {
    pub security_mode: SecurityMode,
    pub dialect: SMBDialect,
    pub server_guid: Uuid,
    pub capabilities: Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: FileTime,
    pub security_buffer: Vec<u8>,
}

impl SMBNegotiateResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.security_buffer.len());
        out.extend_from_slice(&65u16.to_le_bytes());
        out.extend_from_slice(&self.security_mode.bits().to_le_bytes());
        out.extend_from_slice(&(self.dialect as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.server_guid.to_bytes_le());
        out.extend_from_slice(&self.capabilities.bits().to_le_bytes());
        out.extend_from_slice(&self.max_transact_size.to_le_bytes());
        out.extend_from_slice(&self.max_read_size.to_le_bytes());
        out.extend_from_slice(&self.max_write_size.to_le_bytes());
        out.extend_from_slice(&self.system_time.as_bytes());
        put_u16_buffer(&mut out, &self.security_buffer);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 65)?;
        let security_mode = SecurityMode::from_bits_truncate(reader.read_u16()?);
        let raw_dialect = reader.read_u16()?;
        let dialect = SMBDialect::try_from(raw_dialect).map_err(|_| {
            SMBError::protocol_violation(format!("server picked unknown dialect 0x{:04x}", raw_dialect))
        })?;
        reader.skip(2)?;
        let server_guid = Uuid::from_bytes_le(reader.read_array::<16>()?);
        let capabilities = Capabilities::from_bits_truncate(reader.read_u32()?);
        let max_transact_size = reader.read_u32()?;
        let max_read_size = reader.read_u32()?;
        let max_write_size = reader.read_u32()?;
        let system_time = FileTime::from_raw(reader.read_u64()?);
        let security_buffer = reader.read_u16_buffer()?;
        Ok(Self {
            security_mode,
            dialect,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            security_buffer,
        })
    }
}

pub(crate) fn expect_structure_size(reader: &mut ByteReader, expected: u16) -> SMBResult<()> {
    let actual = reader.read_u16()?;
    if actual != expected {
        return Err(SMBError::protocol_violation(format!(
            "bad structure size: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_request_round_trip() {
        let request = SMBNegotiateRequest::new(
            SecurityMode::SIGNING_ENABLED,
            vec![SMBDialect::V2_0_2, SMBDialect::V3_1_1],
        );
        let parsed = SMBNegotiateRequest::parse(&request.as_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn negotiate_response_round_trip() {
        let response = SMBNegotiateResponse {
            security_mode: SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED,
            dialect: SMBDialect::V3_1_1,
            server_guid: Uuid::new_v4(),
            capabilities: Capabilities::LARGE_MTU | Capabilities::ENCRYPTION,
            max_transact_size: 1 << 20,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            system_time: FileTime::now(),
            security_buffer: vec![1, 2, 3],
        };
        let parsed = SMBNegotiateResponse::parse(&response.as_bytes()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn empty_dialect_list_is_rejected() {
        let mut request = SMBNegotiateRequest::new(SecurityMode::SIGNING_ENABLED, vec![SMBDialect::V2_0_2]);
        request.dialects.clear();
        assert!(SMBNegotiateRequest::parse(&request.as_bytes()).is_err());
    }
}
