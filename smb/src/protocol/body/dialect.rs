use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// Negotiable protocol revisions ([MS-SMB2] 2.2.3).
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Serialize, Deserialize, Copy, Clone, Ord, PartialOrd, Hash)]
#[allow(non_camel_case_types)]
pub enum SMBDialect {
    V2_0_2 = 0x202,
    V2_1_0 = 0x210,
    V3_0_0 = 0x300,
    V3_0_2 = 0x302,
    V3_1_1 = 0x311,
}

impl SMBDialect {
    pub fn is_smb3(&self) -> bool {
        *self as u16 >= 0x300
    }

    /// Dialects from 2.1 up may charge more than one credit per request and
    /// advance the message id by the charge consumed.
    pub fn supports_multi_credit(&self) -> bool {
        *self >= SMBDialect::V2_1_0
    }

    pub fn supports_encryption(&self) -> bool {
        self.is_smb3()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_values_match_wire_encoding() {
        assert_eq!(SMBDialect::V2_0_2 as u16, 0x0202);
        assert_eq!(SMBDialect::V2_1_0 as u16, 0x0210);
        assert_eq!(SMBDialect::V3_0_0 as u16, 0x0300);
        assert_eq!(SMBDialect::V3_0_2 as u16, 0x0302);
        assert_eq!(SMBDialect::V3_1_1 as u16, 0x0311);
    }

    #[test]
    fn capability_classification() {
        assert!(!SMBDialect::V2_0_2.supports_multi_credit());
        assert!(SMBDialect::V2_1_0.supports_multi_credit());
        assert!(!SMBDialect::V2_1_0.supports_encryption());
        assert!(SMBDialect::V3_0_0.supports_encryption());
        assert!(SMBDialect::V3_1_1.is_smb3());
    }

    #[test]
    fn dialect_ordering() {
        assert!(SMBDialect::V2_0_2 < SMBDialect::V2_1_0);
        assert!(SMBDialect::V2_1_0 < SMBDialect::V3_0_0);
        assert!(SMBDialect::V3_0_2 < SMBDialect::V3_1_1);
    }
}
