use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_string, ByteReader};
use crate::protocol::body::create::{FileAttributes, FileId};
use crate::protocol::body::filetime::FileTime;
use crate::protocol::body::negotiate::expect_structure_size;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct QueryDirectoryFlags: u8 {
        const RESTART_SCANS       = 0x01;
        const RETURN_SINGLE_ENTRY = 0x02;
        const REOPEN              = 0x10;
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBQueryDirectoryRequest {
    pub flags: QueryDirectoryFlags,
    pub file_id: FileId,
    pub pattern: String,
    pub output_buffer_length: u32,
}

impl SMBQueryDirectoryRequest {
    pub fn restarts_scan(&self) -> bool {
        self.flags.contains(QueryDirectoryFlags::RESTART_SCANS)
            || self.flags.contains(QueryDirectoryFlags::REOPEN)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(25 + self.pattern.len());
        out.extend_from_slice(&33u16.to_le_bytes());
        out.push(self.flags.bits());
        out.push(0);
        out.extend_from_slice(&self.file_id.as_bytes());
        out.extend_from_slice(&self.output_buffer_length.to_le_bytes());
        put_string(&mut out, &self.pattern);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 33)?;
        let flags = QueryDirectoryFlags::from_bits_truncate(reader.read_u8()?);
        reader.skip(1)?;
        let file_id = FileId::parse(&mut reader)?;
        let output_buffer_length = reader.read_u32()?;
        let pattern = reader.read_string()?;
        Ok(Self {
            flags,
            file_id,
            pattern,
            output_buffer_length,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct DirectoryEntry {
    pub file_name: String,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.file_attributes.contains(FileAttributes::DIRECTORY)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        put_string(out, &self.file_name);
        out.extend_from_slice(&self.end_of_file.to_le_bytes());
        out.extend_from_slice(&self.file_attributes.bits().to_le_bytes());
        out.extend_from_slice(&self.creation_time.as_bytes());
        out.extend_from_slice(&self.last_write_time.as_bytes());
    }

    fn parse(reader: &mut ByteReader) -> SMBResult<Self> {
        let file_name = reader.read_string()?;
        let end_of_file = reader.read_u64()?;
        let file_attributes = FileAttributes::from_bits_truncate(reader.read_u32()?);
        let creation_time = FileTime::from_raw(reader.read_u64()?);
        let last_write_time = FileTime::from_raw(reader.read_u64()?);
        Ok(Self {
            file_name,
            end_of_file,
            file_attributes,
            creation_time,
            last_write_time,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBQueryDirectoryResponse {
    pub entries: Vec<DirectoryEntry>,
}

impl SMBQueryDirectoryResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.entries.len() * 48);
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            entry.write_to(&mut out);
        }
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 9)?;
        let count = reader.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(DirectoryEntry::parse(&mut reader)?);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_directory_round_trip() {
        let request = SMBQueryDirectoryRequest {
            flags: QueryDirectoryFlags::RESTART_SCANS,
            file_id: FileId::new(11),
            pattern: "*".to_string(),
            output_buffer_length: 65536,
        };
        assert_eq!(SMBQueryDirectoryRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBQueryDirectoryResponse {
            entries: vec![
                DirectoryEntry {
                    file_name: "docs".to_string(),
                    end_of_file: 0,
                    file_attributes: FileAttributes::DIRECTORY,
                    creation_time: FileTime::now(),
                    last_write_time: FileTime::now(),
                },
                DirectoryEntry {
                    file_name: "notes.txt".to_string(),
                    end_of_file: 120,
                    file_attributes: FileAttributes::ARCHIVE,
                    creation_time: FileTime::now(),
                    last_write_time: FileTime::now(),
                },
            ],
        };
        assert_eq!(SMBQueryDirectoryResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
