pub mod framing;

use serde::{Deserialize, Serialize};

pub use framing::{FramingBuffer, SessionPacket, SessionPacketType};

pub const DIRECT_TCP_PORT: u16 = 445;
pub const NETBIOS_SESSION_PORT: u16 = 139;

/// How the dialog is carried over TCP. NetBIOS framing keeps the original
/// 17-bit length ceiling and the fixed one-credit charge.
#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Copy, Clone, Default)]
pub enum TransportKind {
    #[default]
    DirectTcp,
    NetBios,
}

impl TransportKind {
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::DirectTcp => DIRECT_TCP_PORT,
            TransportKind::NetBios => NETBIOS_SESSION_PORT,
        }
    }

    pub fn is_framed(&self) -> bool {
        matches!(self, TransportKind::NetBios)
    }
}
