use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::byte_helper::{put_u32_buffer, ByteReader};
use crate::protocol::body::create::{FileAttributes, FileId};
use crate::protocol::body::negotiate::expect_structure_size;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBReadRequest {
    pub file_id: FileId,
    pub offset: u64,
    pub length: u32,
    pub minimum_count: u32,
}

impl SMBReadRequest {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(34);
        out.extend_from_slice(&49u16.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.file_id.as_bytes());
        out.extend_from_slice(&self.minimum_count.to_le_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 49)?;
        let length = reader.read_u32()?;
        let offset = reader.read_u64()?;
        let file_id = FileId::parse(&mut reader)?;
        let minimum_count = reader.read_u32()?;
        Ok(Self {
            file_id,
            offset,
            length,
            minimum_count,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBReadResponse {
    pub data: Vec<u8>,
}

impl SMBReadResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&17u16.to_le_bytes());
        put_u32_buffer(&mut out, &self.data);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 17)?;
        let data = reader.read_u32_buffer()?;
        Ok(Self { data })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBWriteRequest {
    pub file_id: FileId,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SMBWriteRequest {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(30 + self.data.len());
        out.extend_from_slice(&49u16.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.file_id.as_bytes());
        put_u32_buffer(&mut out, &self.data);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 49)?;
        let offset = reader.read_u64()?;
        let file_id = FileId::parse(&mut reader)?;
        let data = reader.read_u32_buffer()?;
        Ok(Self {
            file_id,
            offset,
            data,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBWriteResponse {
    pub count: u32,
}

impl SMBWriteResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        out.extend_from_slice(&17u16.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 17)?;
        let count = reader.read_u32()?;
        Ok(Self { count })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCloseRequest {
    pub file_id: FileId,
}

impl SMBCloseRequest {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.file_id.as_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 24)?;
        reader.skip(2)?;
        let file_id = FileId::parse(&mut reader)?;
        Ok(Self { file_id })
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCloseResponse {
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
}

impl SMBCloseResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14);
        out.extend_from_slice(&60u16.to_le_bytes());
        out.extend_from_slice(&self.end_of_file.to_le_bytes());
        out.extend_from_slice(&self.file_attributes.bits().to_le_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 60)?;
        let end_of_file = reader.read_u64()?;
        let file_attributes = FileAttributes::from_bits_truncate(reader.read_u32()?);
        Ok(Self {
            end_of_file,
            file_attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let read = SMBReadRequest {
            file_id: FileId::new(3),
            offset: 4096,
            length: 65536,
            minimum_count: 0,
        };
        assert_eq!(SMBReadRequest::parse(&read.as_bytes()).unwrap(), read);

        let write = SMBWriteRequest {
            file_id: FileId::new(3),
            offset: 0,
            data: b"hello".to_vec(),
        };
        assert_eq!(SMBWriteRequest::parse(&write.as_bytes()).unwrap(), write);
    }

    #[test]
    fn close_round_trip() {
        let request = SMBCloseRequest {
            file_id: FileId::new(9),
        };
        assert_eq!(SMBCloseRequest::parse(&request.as_bytes()).unwrap(), request);

        let response = SMBCloseResponse {
            end_of_file: 1234,
            file_attributes: FileAttributes::NORMAL,
        };
        assert_eq!(SMBCloseResponse::parse(&response.as_bytes()).unwrap(), response);
    }
}
