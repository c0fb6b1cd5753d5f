use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// File access rights ([MS-SMB2] 2.2.13.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    pub struct AccessMask: u32 {
        const READ_DATA        = 0x00000001;
        const WRITE_DATA       = 0x00000002;
        const APPEND_DATA      = 0x00000004;
        const READ_ATTRIBUTES  = 0x00000080;
        const WRITE_ATTRIBUTES = 0x00000100;
        const DELETE           = 0x00010000;
        const GENERIC_ALL      = 0x10000000;
        const GENERIC_WRITE    = 0x40000000;
        const GENERIC_READ     = 0x80000000;
    }
}

impl AccessMask {
    pub fn grants_read(&self) -> bool {
        self.intersects(AccessMask::READ_DATA | AccessMask::GENERIC_READ | AccessMask::GENERIC_ALL)
    }

    pub fn grants_write(&self) -> bool {
        self.intersects(
            AccessMask::WRITE_DATA
                | AccessMask::APPEND_DATA
                | AccessMask::GENERIC_WRITE
                | AccessMask::GENERIC_ALL,
        )
    }
}
