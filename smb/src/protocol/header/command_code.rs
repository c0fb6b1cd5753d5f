use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// SMB2 command codes ([MS-SMB2] 2.2.1).
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Copy)]
pub enum SMBCommandCode {
    Negotiate = 0x0,
    SessionSetup,
    Logoff,
    TreeConnect,
    TreeDisconnect,
    Create,
    Close,
    Flush,
    Read,
    Write,
    Lock,
    IOCTL,
    Cancel,
    Echo,
    QueryDirectory,
    ChangeNotify,
    QueryInfo,
    SetInfo,
    OplockBreak,
}
