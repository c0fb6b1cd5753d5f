use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// 100-nanosecond intervals between the Windows epoch (1601) and the Unix
/// epoch.
const EPOCH_DIFFERENCE: u64 = 116_444_736_000_000_000;

/// Windows FILETIME: 100-nanosecond intervals since 1601-01-01.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Default)]
pub struct FileTime(u64);

impl FileTime {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix_nanos(since_epoch.as_nanos() as u64)
    }

    pub fn from_unix_nanos(nanos: u64) -> Self {
        FileTime(nanos / 100 + EPOCH_DIFFERENCE)
    }

    pub fn from_raw(intervals: u64) -> Self {
        FileTime(intervals)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn as_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_maps_to_windows_offset() {
        assert_eq!(FileTime::from_unix_nanos(0).as_raw(), EPOCH_DIFFERENCE);
        assert_eq!(FileTime::from_unix_nanos(100).as_raw(), EPOCH_DIFFERENCE + 1);
    }

    #[test]
    fn now_is_after_the_epoch() {
        assert!(FileTime::now() > FileTime::from_unix_nanos(0));
    }
}
