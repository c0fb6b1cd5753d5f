use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBParseResult;

use crate::byte_helper::ByteReader;

pub const TRANSFORM_HEADER_LENGTH: usize = 52;
pub const TRANSFORM_PROTOCOL_ID: [u8; 4] = [0xFD, b'S', b'M', b'B'];

/// Flags field value marking the payload as encrypted ([MS-SMB2] 2.2.41).
const TRANSFORM_FLAG_ENCRYPTED: u16 = 0x0001;

/// Wrapper header for a whole-message encrypted payload.
///
/// The GCM tag lives in the signature field; the 32 bytes following it
/// (nonce through session id) are the additional authenticated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SMBTransformHeader {
    pub signature: [u8; 16],
    pub nonce: [u8; 16],
    pub original_message_size: u32,
    pub session_id: u64,
}

impl SMBTransformHeader {
    pub fn new(nonce: [u8; 16], original_message_size: u32, session_id: u64) -> Self {
        Self {
            signature: [0; 16],
            nonce,
            original_message_size,
            session_id,
        }
    }

    /// Whether `input` starts with an encrypted-message wrapper rather than a
    /// plain SMB2 header.
    pub fn is_transform(input: &[u8]) -> bool {
        input.len() >= 4 && input[..4] == TRANSFORM_PROTOCOL_ID
    }

    /// The authenticated-but-unencrypted portion: everything after the
    /// signature field.
    pub fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(32);
        aad.extend_from_slice(&self.nonce);
        aad.extend_from_slice(&self.original_message_size.to_le_bytes());
        aad.extend_from_slice(&[0u8; 2]);
        aad.extend_from_slice(&TRANSFORM_FLAG_ENCRYPTED.to_le_bytes());
        aad.extend_from_slice(&self.session_id.to_le_bytes());
        aad
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSFORM_HEADER_LENGTH);
        out.extend_from_slice(&TRANSFORM_PROTOCOL_ID);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.associated_data());
        out
    }

    pub fn parse(input: &[u8]) -> SMBParseResult<Self> {
        let mut reader = ByteReader::new(input);
        let magic = reader.read_array::<4>()?;
        if magic != TRANSFORM_PROTOCOL_ID {
            return Err(SMBError::protocol_violation("missing transform protocol id"));
        }
        let signature = reader.read_array::<16>()?;
        let nonce = reader.read_array::<16>()?;
        let original_message_size = reader.read_u32()?;
        reader.skip(2)?;
        let flags = reader.read_u16()?;
        if flags != TRANSFORM_FLAG_ENCRYPTED {
            return Err(SMBError::security_error(format!(
                "unsupported transform flags {:#06x}",
                flags
            )));
        }
        let session_id = reader.read_u64()?;
        Ok((
            reader.remaining(),
            Self {
                signature,
                nonce,
                original_message_size,
                session_id,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut header = SMBTransformHeader::new([7; 16], 512, 0x44);
        header.signature = [9; 16];
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), TRANSFORM_HEADER_LENGTH);
        assert!(SMBTransformHeader::is_transform(&bytes));
        let (rest, parsed) = SMBTransformHeader::parse(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, header);
    }

    #[test]
    fn plain_header_is_not_transform() {
        assert!(!SMBTransformHeader::is_transform(&[0xFE, b'S', b'M', b'B']));
    }
}
