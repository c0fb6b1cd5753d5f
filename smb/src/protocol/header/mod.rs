pub mod command_code;
pub mod flags;
mod header;
mod transform;

pub use command_code::SMBCommandCode;
pub use flags::SMBFlags;
pub use header::{SMBHeader, NO_CORRELATION_ID, SMB2_HEADER_LENGTH, SMB2_PROTOCOL_ID};
pub use transform::{SMBTransformHeader, TRANSFORM_HEADER_LENGTH, TRANSFORM_PROTOCOL_ID};
