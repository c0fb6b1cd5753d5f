use serde::{Deserialize, Serialize};
use smb_dialog_core::SMBResult;

use crate::byte_helper::ByteReader;
use crate::protocol::body::negotiate::expect_structure_size;

macro_rules! empty_body {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
        pub struct $name;

        impl $name {
            pub fn as_bytes(&self) -> Vec<u8> {
                vec![4, 0, 0, 0]
            }

            pub fn parse(input: &[u8]) -> SMBResult<Self> {
                let mut reader = ByteReader::new(input);
                expect_structure_size(&mut reader, 4)?;
                Ok(Self)
            }
        }
    };
}

empty_body!(SMBLogoffRequest);
empty_body!(SMBLogoffResponse);
empty_body!(SMBTreeDisconnectRequest);
empty_body!(SMBTreeDisconnectResponse);
empty_body!(
    /// Carries no payload of its own; the header's message id names the
    /// in-flight request to abort.
    SMBCancelRequest
);
empty_body!(SMBEchoRequest);
empty_body!(SMBEchoResponse);

/// Body attached to any response whose status is not success. The status
/// itself travels in the header.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
pub struct SMBErrorResponse;

impl SMBErrorResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(0);
        out
    }

    pub fn parse(input: &[u8]) -> SMBResult<Self> {
        let mut reader = ByteReader::new(input);
        expect_structure_size(&mut reader, 9)?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bodies_round_trip() {
        assert_eq!(
            SMBEchoRequest::parse(&SMBEchoRequest.as_bytes()).unwrap(),
            SMBEchoRequest
        );
        assert_eq!(
            SMBErrorResponse::parse(&SMBErrorResponse.as_bytes()).unwrap(),
            SMBErrorResponse
        );
    }
}
