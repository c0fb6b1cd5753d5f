use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_string, ByteReader};
use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::filetime::FileTime;
use crate::protocol::body::negotiate::expect_structure_size;

/// Handle to an open file or directory. Durable handles are not supported,
/// so the persistent half always mirrors the volatile id.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, Hash)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn new(id: u64) -> Self {
        Self {
            persistent: id,
            volatile: id,
        }
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.persistent.to_le_bytes());
        out[8..].copy_from_slice(&self.volatile.to_le_bytes());
        out
    }

    pub fn parse(reader: &mut ByteReader) -> SMBResult<Self> {
        let persistent = reader.read_u64()?;
        let volatile = reader.read_u64()?;
        Ok(Self {
            persistent,
            volatile,
        })
    }
}

#[repr(u32)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone)]
pub enum CreateDisposition {
    Supersede = 0x00,
    Open = 0x01,
    Create = 0x02,
    OpenIf = 0x03,
    Overwrite = 0x04,
    OverwriteIf = 0x05,
}

#[repr(u32)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone)]
pub enum CreateAction {
    Superseded = 0x00,
    Opened = 0x01,
    Created = 0x02,
    Overwritten = 0x03,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE     = 0x00000001;
        const NON_DIRECTORY_FILE = 0x00000040;
        const DELETE_ON_CLOSE    = 0x00001000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct ShareAccess: u32 {
        const READ   = 0x01;
        const WRITE  = 0x02;
        const DELETE = 0x04;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct FileAttributes: u32 {
        const READONLY  = 0x0001;
        const DIRECTORY = 0x0010;
        const ARCHIVE   = 0x0020;
        const NORMAL    = 0x0080;
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCreateRequest {
    pub desired_access: AccessMask,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    pub name: String,
}

impl SMBCreateRequest {
    pub fn wants_directory(&self) -> bool {
        self.create_options.contains(CreateOptions::DIRECTORY_FILE)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.name.len());
        out.extend_from_slice(&57u16.to_le_bytes());
        out.extend_from_slice(&self.desired_access.bits().to_le_bytes());
        out.extend_from_slice(&self.share_access.bits().to_le_bytes());
        out.extend_from_slice(&(self.create_disposition as u32).to_le_bytes());
        out.extend_from_slice(&self.create_options.bits().to_le_bytes());
        put_string(&mut out, &self.name);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 57)?;
        let desired_access = AccessMask::from_bits_truncate(reader.read_u32()?);
        let share_access = ShareAccess::from_bits_truncate(reader.read_u32()?);
        let raw_disposition = reader.read_u32()?;
        let create_disposition = CreateDisposition::try_from(raw_disposition).map_err(|_| {
            SMBError::protocol_violation(format!("unknown create disposition {raw_disposition}"))
        })?;
        let create_options = CreateOptions::from_bits_truncate(reader.read_u32()?);
        let name = reader.read_string()?;
        Ok(Self {
            desired_access,
            share_access,
            create_disposition,
            create_options,
            name,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCreateResponse {
    pub create_action: CreateAction,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    pub file_id: FileId,
}

impl SMBCreateResponse {
    pub fn is_directory(&self) -> bool {
        self.file_attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(89);
        out.extend_from_slice(&89u16.to_le_bytes());
        out.extend_from_slice(&(self.create_action as u32).to_le_bytes());
        out.extend_from_slice(&self.creation_time.as_bytes());
        out.extend_from_slice(&self.last_write_time.as_bytes());
        out.extend_from_slice(&self.end_of_file.to_le_bytes());
        out.extend_from_slice(&self.file_attributes.bits().to_le_bytes());
        out.extend_from_slice(&self.file_id.as_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 89)?;
        let raw_action = reader.read_u32()?;
        let create_action = CreateAction::try_from(raw_action).map_err(|_| {
            SMBError::protocol_violation(format!("unknown create action {raw_action}"))
        })?;
        let creation_time = FileTime::from_raw(reader.read_u64()?);
        let last_write_time = FileTime::from_raw(reader.read_u64()?);
        let end_of_file = reader.read_u64()?;
        let file_attributes = FileAttributes::from_bits_truncate(reader.read_u32()?);
        let file_id = FileId::parse(&mut reader)?;
        Ok(Self {
            create_action,
            creation_time,
            last_write_time,
            end_of_file,
            file_attributes,
            file_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_halves_mirror_each_other() {
        let id = FileId::new(42);
        assert_eq!(id.persistent, id.volatile);
        let bytes = id.as_bytes();
        assert_eq!(&bytes[..8], &bytes[8..]);
    }

    #[test]
    fn create_round_trip() {
        let request = SMBCreateRequest {
            desired_access: AccessMask::GENERIC_READ | AccessMask::WRITE_DATA,
            share_access: ShareAccess::READ,
            create_disposition: CreateDisposition::OpenIf,
            create_options: CreateOptions::NON_DIRECTORY_FILE,
            name: "reports\\q3.txt".to_string(),
        };
        assert_eq!(SMBCreateRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBCreateResponse {
            create_action: CreateAction::Created,
            creation_time: FileTime::now(),
            last_write_time: FileTime::now(),
            end_of_file: 0,
            file_attributes: FileAttributes::ARCHIVE,
            file_id: FileId::new(7),
        };
        assert_eq!(SMBCreateResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
