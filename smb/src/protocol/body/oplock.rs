use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::byte_helper::ByteReader;
use crate::protocol::body::create::FileId;
use crate::protocol::body::negotiate::expect_structure_size;

/// Server-initiated break notification. Arrives with the reserved
/// correlation id, outside any request/response pairing.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy)]
pub struct SMBOplockBreakNotification {
    pub oplock_level: u8,
    pub file_id: FileId,
}

impl SMBOplockBreakNotification {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&24u16.to_le_bytes());
        out.push(self.oplock_level);
        out.extend_from_slice(&[0; 5]);
        out.extend_from_slice(&self.file_id.as_bytes());
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 24)?;
        let oplock_level = reader.read_u8()?;
        reader.skip(5)?;
        let file_id = FileId::parse(&mut reader)?;
        Ok(Self {
            oplock_level,
            file_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oplock_break_round_trip() {
        let notification = SMBOplockBreakNotification {
            oplock_level: 0,
            file_id: FileId::new(77),
        };
        assert_eq!(
            SMBOplockBreakNotification::parse(&notification.as_bytes()).unwrap(),
            notification
        );
    }
}
