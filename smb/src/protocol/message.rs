use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::protocol::body::SMBBody;
use crate::protocol::header::SMBHeader;

/// A complete dialog message: the 64-byte header followed by the command
/// body.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBMessage {
    pub header: SMBHeader,
    pub body: SMBBody,
}

impl SMBMessage {
    pub fn new(header: SMBHeader, body: SMBBody) -> Self {
        Self { header, body }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.as_bytes();
        bytes.extend_from_slice(&self.body.as_bytes());
        bytes
    }

    /// Encoding used as signing input: identical to the wire form except the
    /// signature field is zeroed.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.header.clone();
        unsigned.signature = [0; 16];
        let mut bytes = unsigned.as_bytes();
        bytes.extend_from_slice(&self.body.as_bytes());
        bytes
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let (rest, header) = SMBHeader::parse(input)?;
        let body = SMBBody::parse(&header, rest)?;
        Ok(Self { header, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::{SMBEchoRequest, SMBTreeConnectRequest};
    use crate::protocol::header::SMBCommandCode;

    #[test]
    fn message_round_trip() {
        let header = SMBHeader::request(SMBCommandCode::TreeConnect, 4, 0x99, 0);
        let message = SMBMessage::new(
            header,
            SMBBody::TreeConnectRequest(SMBTreeConnectRequest::new(r"\\srv\tmp")),
        );
        assert_eq!(SMBMessage::parse(&message.as_bytes()).unwrap(), message);
    }

    #[test]
    fn signable_bytes_zero_the_signature() {
        let mut header = SMBHeader::request(SMBCommandCode::Echo, 1, 0, 0);
        header.signature = [0xCC; 16];
        let message = SMBMessage::new(header, SMBBody::EchoRequest(SMBEchoRequest));
        let wire = message.as_bytes();
        let signable = message.signable_bytes();
        assert_eq!(wire.len(), signable.len());
        assert_eq!(&wire[..48], &signable[..48]);
        assert_eq!(&signable[48..64], &[0u8; 16]);
        assert_eq!(&wire[48..64], &[0xCC; 16]);
    }
}
