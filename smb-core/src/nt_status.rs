use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// The subset of NT status codes the dialog engine produces or reacts to.
///
/// Interim and informational codes (`Pending`, `NotifyCleanup`) are carried in
/// response headers without terminating the exchange; everything at or above
/// 0xC0000000 is a failure status.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive)]
pub enum NTStatus {
    Success = 0x0000_0000,
    Pending = 0x0000_0103,
    NotifyCleanup = 0x0000_010B,
    BufferOverflow = 0x8000_0005,
    NoMoreFiles = 0x8000_0006,
    InvalidHandle = 0xC000_0008,
    InvalidParameter = 0xC000_000D,
    EndOfFile = 0xC000_0011,
    MoreProcessingRequired = 0xC000_0016,
    AccessDenied = 0xC000_0022,
    ObjectNameNotFound = 0xC000_0034,
    ObjectNameCollision = 0xC000_0035,
    LogonFailure = 0xC000_006D,
    InsufficientResources = 0xC000_009A,
    NotSupported = 0xC000_00BB,
    NetworkNameDeleted = 0xC000_00C9,
    BadNetworkName = 0xC000_00CC,
    RequestNotAccepted = 0xC000_00D0,
    Cancelled = 0xC000_0120,
    FileClosed = 0xC000_0128,
    UserSessionDeleted = 0xC000_0203,
    ConnectionDisconnected = 0xC000_020C,
}

impl NTStatus {
    pub fn is_success(&self) -> bool {
        *self == NTStatus::Success
    }

    pub fn is_pending(&self) -> bool {
        *self == NTStatus::Pending
    }

    /// Severity-error statuses (0xC0000000 and up) fail the operation they
    /// belong to; warning and informational codes do not.
    pub fn is_error(&self) -> bool {
        (*self as u32) >= 0xC000_0000
    }
}
