use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_string, ByteReader};
use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::negotiate::expect_structure_size;

#[repr(u8)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone, Hash)]
pub enum ShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct SMBShareFlags: u32 {
        const RESTRICT_EXCLUSIVE_OPENS = 0x00000100;
        const FORCE_SHARED_DELETE      = 0x00000200;
        const ENCRYPT_DATA             = 0x00008000;
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBTreeConnectRequest {
    pub path: String,
}

impl SMBTreeConnectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Share name without the `\\server\` prefix.
    pub fn share_name(&self) -> &str {
        self.path.rsplit('\\').next().unwrap_or(&self.path)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.path.len());
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        put_string(&mut out, &self.path);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 9)?;
        reader.skip(2)?;
        let path = reader.read_string()?;
        Ok(Self { path })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBTreeConnectResponse {
    pub share_type: ShareType,
    pub share_flags: SMBShareFlags,
    pub maximal_access: AccessMask,
}

impl SMBTreeConnectResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&16u16.to_le_bytes());
        out.push(self.share_type as u8);
        out.push(0);
        out.extend_from_slice(&self.share_flags.bits().to_le_bytes());
        out.extend_from_slice(&self.maximal_access.bits().to_le_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 16)?;
        let raw_type = reader.read_u8()?;
        let share_type = ShareType::try_from(raw_type).map_err(|_| {
            SMBError::protocol_violation(format!("unknown share type 0x{:02x}", raw_type))
        })?;
        reader.skip(1)?;
        let share_flags = SMBShareFlags::from_bits_truncate(reader.read_u32()?);
        let maximal_access = AccessMask::from_bits_truncate(reader.read_u32()?);
        Ok(Self {
            share_type,
            share_flags,
            maximal_access,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_name_strips_unc_prefix() {
        let request = SMBTreeConnectRequest::new(r"\\localhost\public");
        assert_eq!(request.share_name(), "public");
        let bare = SMBTreeConnectRequest::new("public");
        assert_eq!(bare.share_name(), "public");
    }

    #[test]
    fn tree_connect_round_trip() {
        let request = SMBTreeConnectRequest::new(r"\\server\docs");
        assert_eq!(SMBTreeConnectRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBTreeConnectResponse {
            share_type: ShareType::Disk,
            share_flags: SMBShareFlags::ENCRYPT_DATA,
            maximal_access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
        };
        assert_eq!(SMBTreeConnectResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
