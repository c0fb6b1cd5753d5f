use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use crate::nt_status::NTStatus;

/// Error taxonomy for the dialog engine.
///
/// `Framing`, `ProtocolViolation`, and `Security` are fatal to the connection
/// that produced them. `CorrelationTimeout`, `ResourceExhausted`, `NotFound`,
/// and `Response` are reported to the single calling operation and leave the
/// connection usable.
#[derive(Debug)]
pub enum SMBError {
    Framing(String),
    ProtocolViolation(String),
    Security(String),
    FlowControl { requested: u16, available: u16 },
    CorrelationTimeout { message_id: u64 },
    ResourceExhausted { space: &'static str },
    NotFound { kind: &'static str, id: u64 },
    Response(NTStatus),
    IO(io::Error),
    Server(String),
}

impl SMBError {
    pub fn framing_error<T: Into<String>>(message: T) -> Self {
        Self::Framing(message.into())
    }

    pub fn protocol_violation<T: Into<String>>(message: T) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn security_error<T: Into<String>>(message: T) -> Self {
        Self::Security(message.into())
    }

    pub fn flow_control(requested: u16, available: u16) -> Self {
        Self::FlowControl { requested, available }
    }

    pub fn correlation_timeout(message_id: u64) -> Self {
        Self::CorrelationTimeout { message_id }
    }

    pub fn resource_exhausted(space: &'static str) -> Self {
        Self::ResourceExhausted { space }
    }

    pub fn not_found(kind: &'static str, id: u64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn response_error(status: NTStatus) -> Self {
        Self::Response(status)
    }

    pub fn io_error<T: Into<io::Error>>(error: T) -> Self {
        Self::IO(error.into())
    }

    pub fn server_error<T: Into<String>>(message: T) -> Self {
        Self::Server(message.into())
    }

    /// True for failures that must tear the owning connection down rather
    /// than being returned to a single caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::ProtocolViolation(_) | Self::Security(_) | Self::IO(_)
        )
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Framing(msg) => write!(f, "framing error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::Security(msg) => write!(f, "security failure: {}", msg),
            Self::FlowControl { requested, available } => write!(
                f,
                "send rejected: charge {} exceeds available credits {}",
                requested, available
            ),
            Self::CorrelationTimeout { message_id } => {
                write!(f, "no response for message {} within the deadline", message_id)
            }
            Self::ResourceExhausted { space } => {
                write!(f, "identifier space exhausted: {}", space)
            }
            Self::NotFound { kind, id } => write!(f, "unknown {} identifier {:#x}", kind, id),
            Self::Response(status) => write!(f, "operation failed with status {:?}", status),
            Self::IO(error) => write!(f, "I/O failure: {}", error),
            Self::Server(msg) => write!(f, "server failure: {}", msg),
        }
    }
}

impl From<io::Error> for SMBError {
    fn from(error: io::Error) -> Self {
        Self::IO(error)
    }
}

impl Error for SMBError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(SMBError::framing_error("bad length").is_fatal());
        assert!(SMBError::security_error("signature mismatch").is_fatal());
        assert!(!SMBError::correlation_timeout(7).is_fatal());
        assert!(!SMBError::resource_exhausted("tree").is_fatal());
        assert!(!SMBError::response_error(NTStatus::AccessDenied).is_fatal());
    }
}
