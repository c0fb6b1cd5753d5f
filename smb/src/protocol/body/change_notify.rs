use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_string, ByteReader};
use crate::protocol::body::create::FileId;
use crate::protocol::body::negotiate::expect_structure_size;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct ChangeNotifyFlags: u16 {
        const WATCH_TREE = 0x01;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct CompletionFilter: u32 {
        const FILE_NAME   = 0x0001;
        const DIR_NAME    = 0x0002;
        const ATTRIBUTES  = 0x0004;
        const SIZE        = 0x0008;
        const LAST_WRITE  = 0x0010;
        const CREATION    = 0x0040;
    }
}

#[repr(u32)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone)]
pub enum NotifyAction {
    Added = 0x01,
    Removed = 0x02,
    Modified = 0x03,
    RenamedOldName = 0x04,
    RenamedNewName = 0x05,
}

/// Long-lived watch on a directory handle. The response arrives only when a
/// change fires, the watch is cancelled, or the handle goes away.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBChangeNotifyRequest {
    pub flags: ChangeNotifyFlags,
    pub output_buffer_length: u32,
    pub file_id: FileId,
    pub completion_filter: CompletionFilter,
}

impl SMBChangeNotifyRequest {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&self.output_buffer_length.to_le_bytes());
        out.extend_from_slice(&self.file_id.as_bytes());
        out.extend_from_slice(&self.completion_filter.bits().to_le_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 32)?;
        let flags = ChangeNotifyFlags::from_bits_truncate(reader.read_u16()?);
        let output_buffer_length = reader.read_u32()?;
        let file_id = FileId::parse(&mut reader)?;
        let completion_filter = CompletionFilter::from_bits_truncate(reader.read_u32()?);
        Ok(Self {
            flags,
            output_buffer_length,
            file_id,
            completion_filter,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct FileNotifyInformation {
    pub action: NotifyAction,
    pub file_name: String,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBChangeNotifyResponse {
    pub changes: Vec<FileNotifyInformation>,
}

impl SMBChangeNotifyResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.changes.len() * 16);
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&(self.changes.len() as u32).to_le_bytes());
        for change in &self.changes {
            out.extend_from_slice(&(change.action as u32).to_le_bytes());
            put_string(&mut out, &change.file_name);
        }
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 9)?;
        let count = reader.read_u32()? as usize;
        let mut changes = Vec::with_capacity(count);
        for _ in 0..count {
            let raw_action = reader.read_u32()?;
            let action = NotifyAction::try_from(raw_action).map_err(|_| {
                SMBError::protocol_violation(format!("unknown notify action {raw_action}"))
            })?;
            let file_name = reader.read_string()?;
            changes.push(FileNotifyInformation { action, file_name });
        }
        Ok(Self { changes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_notify_round_trip() {
        let request = SMBChangeNotifyRequest {
            flags: ChangeNotifyFlags::empty(),
            output_buffer_length: 4096,
            file_id: FileId::new(5),
            completion_filter: CompletionFilter::FILE_NAME | CompletionFilter::LAST_WRITE,
        };
        assert_eq!(SMBChangeNotifyRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBChangeNotifyResponse {
            changes: vec![FileNotifyInformation {
                action: NotifyAction::Added,
                file_name: "new.txt".to_string(),
            }],
        };
        assert_eq!(SMBChangeNotifyResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
