//! Shared plumbing for the SMB dialog engine crates: the common error type,
//! NT status codes, and feature-gated logging macros.

use error::SMBError;

pub mod error;
pub mod logging;
pub mod nt_status;

pub type SMBResult<T> = Result<T, SMBError>;

/// Result of an incremental parse: the unconsumed input plus the parsed value.
pub type SMBParseResult<'a, O> = Result<(&'a [u8], O), SMBError>;
