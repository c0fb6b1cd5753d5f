use serde::{Deserialize, Serialize};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;

use crate::protocol::header::{SMBCommandCode, SMBHeader};

pub mod access_mask;
pub mod capabilities;
pub mod change_notify;
pub mod create;
pub mod dialect;
pub mod empty;
pub mod file_io;
pub mod filetime;
pub mod negotiate;
pub mod oplock;
pub mod query_directory;
pub mod security_mode;
pub mod session_setup;
pub mod tree_connect;

pub use access_mask::AccessMask;
pub use capabilities::Capabilities;
pub use change_notify::{
    ChangeNotifyFlags, CompletionFilter, FileNotifyInformation, NotifyAction,
    SMBChangeNotifyRequest, SMBChangeNotifyResponse,
};
pub use create::{
    CreateAction, CreateDisposition, CreateOptions, FileAttributes, FileId, SMBCreateRequest,
    SMBCreateResponse, ShareAccess,
};
pub use dialect::SMBDialect;
pub use empty::{
    SMBCancelRequest, SMBEchoRequest, SMBEchoResponse, SMBErrorResponse, SMBLogoffRequest,
    SMBLogoffResponse, SMBTreeDisconnectRequest, SMBTreeDisconnectResponse,
};
pub use file_io::{
    SMBCloseRequest, SMBCloseResponse, SMBReadRequest, SMBReadResponse, SMBWriteRequest,
    SMBWriteResponse,
};
pub use filetime::FileTime;
pub use negotiate::{SMBNegotiateRequest, SMBNegotiateResponse};
pub use oplock::SMBOplockBreakNotification;
pub use query_directory::{
    DirectoryEntry, QueryDirectoryFlags, SMBQueryDirectoryRequest, SMBQueryDirectoryResponse,
};
pub use security_mode::SecurityMode;
pub use session_setup::{SMBSessionSetupRequest, SMBSessionSetupResponse, SessionFlags};
pub use tree_connect::{SMBShareFlags, SMBTreeConnectRequest, SMBTreeConnectResponse, ShareType};

/// The decoded payload of a message, tagged by command and direction.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub enum SMBBody {
    NegotiateRequest(SMBNegotiateRequest),
    NegotiateResponse(SMBNegotiateResponse),
    SessionSetupRequest(SMBSessionSetupRequest),
    SessionSetupResponse(SMBSessionSetupResponse),
    LogoffRequest(SMBLogoffRequest),
    LogoffResponse(SMBLogoffResponse),
    TreeConnectRequest(SMBTreeConnectRequest),
    TreeConnectResponse(SMBTreeConnectResponse),
    TreeDisconnectRequest(SMBTreeDisconnectRequest),
    TreeDisconnectResponse(SMBTreeDisconnectResponse),
    CreateRequest(SMBCreateRequest),
    CreateResponse(SMBCreateResponse),
    CloseRequest(SMBCloseRequest),
    CloseResponse(SMBCloseResponse),
    ReadRequest(SMBReadRequest),
    ReadResponse(SMBReadResponse),
    WriteRequest(SMBWriteRequest),
    WriteResponse(SMBWriteResponse),
    QueryDirectoryRequest(SMBQueryDirectoryRequest),
    QueryDirectoryResponse(SMBQueryDirectoryResponse),
    ChangeNotifyRequest(SMBChangeNotifyRequest),
    ChangeNotifyResponse(SMBChangeNotifyResponse),
    CancelRequest(SMBCancelRequest),
    EchoRequest(SMBEchoRequest),
    EchoResponse(SMBEchoResponse),
    OplockBreakNotification(SMBOplockBreakNotification),
    Error(SMBErrorResponse),
}

impl SMBBody {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            SMBBody::NegotiateRequest(body) => body.as_bytes(),
            SMBBody::NegotiateResponse(body) => body.as_bytes(),
            SMBBody::SessionSetupRequest(body) => body.as_bytes(),
            SMBBody::SessionSetupResponse(body) => body.as_bytes(),
            SMBBody::LogoffRequest(body) => body.as_bytes(),
            SMBBody::LogoffResponse(body) => body.as_bytes(),
            SMBBody::TreeConnectRequest(body) => body.as_bytes(),
            SMBBody::TreeConnectResponse(body) => body.as_bytes(),
            SMBBody::TreeDisconnectRequest(body) => body.as_bytes(),
            SMBBody::TreeDisconnectResponse(body) => body.as_bytes(),
            SMBBody::CreateRequest(body) => body.as_bytes(),
            SMBBody::CreateResponse(body) => body.as_bytes(),
            SMBBody::CloseRequest(body) => body.as_bytes(),
            SMBBody::CloseResponse(body) => body.as_bytes(),
            SMBBody::ReadRequest(body) => body.as_bytes(),
            SMBBody::ReadResponse(body) => body.as_bytes(),
            SMBBody::WriteRequest(body) => body.as_bytes(),
            SMBBody::WriteResponse(body) => body.as_bytes(),
            SMBBody::QueryDirectoryRequest(body) => body.as_bytes(),
            SMBBody::QueryDirectoryResponse(body) => body.as_bytes(),
            SMBBody::ChangeNotifyRequest(body) => body.as_bytes(),
            SMBBody::ChangeNotifyResponse(body) => body.as_bytes(),
            SMBBody::CancelRequest(body) => body.as_bytes(),
            SMBBody::EchoRequest(body) => body.as_bytes(),
            SMBBody::EchoResponse(body) => body.as_bytes(),
            SMBBody::OplockBreakNotification(body) => body.as_bytes(),
            SMBBody::Error(body) => body.as_bytes(),
        }
    }

    /// Command code implied by the variant. `Error` has no command of its
    /// own; callers pair it with the request it answers.
    pub fn command_code(&self) -> Option<SMBCommandCode> {
        let code = match self {
            SMBBody::NegotiateRequest(_) | SMBBody::NegotiateResponse(_) => SMBCommandCode::Negotiate,
            SMBBody::SessionSetupRequest(_) | SMBBody::SessionSetupResponse(_) => {
                SMBCommandCode::SessionSetup
            }
            SMBBody::LogoffRequest(_) | SMBBody::LogoffResponse(_) => SMBCommandCode::Logoff,
            SMBBody::TreeConnectRequest(_) | SMBBody::TreeConnectResponse(_) => {
                SMBCommandCode::TreeConnect
            }
            SMBBody::TreeDisconnectRequest(_) | SMBBody::TreeDisconnectResponse(_) => {
                SMBCommandCode::TreeDisconnect
            }
            SMBBody::CreateRequest(_) | SMBBody::CreateResponse(_) => SMBCommandCode::Create,
            SMBBody::CloseRequest(_) | SMBBody::CloseResponse(_) => SMBCommandCode::Close,
            SMBBody::ReadRequest(_) | SMBBody::ReadResponse(_) => SMBCommandCode::Read,
            SMBBody::WriteRequest(_) | SMBBody::WriteResponse(_) => SMBCommandCode::Write,
            SMBBody::QueryDirectoryRequest(_) | SMBBody::QueryDirectoryResponse(_) => {
                SMBCommandCode::QueryDirectory
            }
            SMBBody::ChangeNotifyRequest(_) | SMBBody::ChangeNotifyResponse(_) => {
                SMBCommandCode::ChangeNotify
            }
            SMBBody::CancelRequest(_) => SMBCommandCode::Cancel,
            SMBBody::EchoRequest(_) | SMBBody::EchoResponse(_) => SMBCommandCode::Echo,
            SMBBody::OplockBreakNotification(_) => SMBCommandCode::OplockBreak,
            SMBBody::Error(_) => return None,
        };
        Some(code)
    }

    /// Transfer size the credit charge is computed from: the data carried
    /// or, for reads and directory scans, the size the reply may carry.
    pub fn payload_size(&self) -> usize {
        match self {
            SMBBody::ReadRequest(body) => body.length as usize,
            SMBBody::ReadResponse(body) => body.data.len(),
            SMBBody::WriteRequest(body) => body.data.len(),
            SMBBody::QueryDirectoryRequest(body) => body.output_buffer_length as usize,
            SMBBody::ChangeNotifyRequest(body) => body.output_buffer_length as usize,
            _ => 0,
        }
    }

    pub fn parse(header: &SMBHeader, input: &[u8]) -> SMBResult<Self> {
        let response = header.is_response();
        if response && takes_error_body(header) {
            return SMBErrorResponse::parse(input).map(SMBBody::Error);
        }
        match (header.command, response) {
            (SMBCommandCode::Negotiate, false) => {
                SMBNegotiateRequest::parse(input).map(SMBBody::NegotiateRequest)
            }
            (SMBCommandCode::Negotiate, true) => {
                SMBNegotiateResponse::parse(input).map(SMBBody::NegotiateResponse)
            }
            (SMBCommandCode::SessionSetup, false) => {
                SMBSessionSetupRequest::parse(input).map(SMBBody::SessionSetupRequest)
            }
            (SMBCommandCode::SessionSetup, true) => {
                SMBSessionSetupResponse::parse(input).map(SMBBody::SessionSetupResponse)
            }
            (SMBCommandCode::Logoff, false) => {
                SMBLogoffRequest::parse(input).map(SMBBody::LogoffRequest)
            }
            (SMBCommandCode::Logoff, true) => {
                SMBLogoffResponse::parse(input).map(SMBBody::LogoffResponse)
            }
            (SMBCommandCode::TreeConnect, false) => {
                SMBTreeConnectRequest::parse(input).map(SMBBody::TreeConnectRequest)
            }
            (SMBCommandCode::TreeConnect, true) => {
                SMBTreeConnectResponse::parse(input).map(SMBBody::TreeConnectResponse)
            }
            (SMBCommandCode::TreeDisconnect, false) => {
                SMBTreeDisconnectRequest::parse(input).map(SMBBody::TreeDisconnectRequest)
            }
            (SMBCommandCode::TreeDisconnect, true) => {
                SMBTreeDisconnectResponse::parse(input).map(SMBBody::TreeDisconnectResponse)
            }
            (SMBCommandCode::Create, false) => {
                SMBCreateRequest::parse(input).map(SMBBody::CreateRequest)
            }
            (SMBCommandCode::Create, true) => {
                SMBCreateResponse::parse(input).map(SMBBody::CreateResponse)
            }
            (SMBCommandCode::Close, false) => {
                SMBCloseRequest::parse(input).map(SMBBody::CloseRequest)
            }
            (SMBCommandCode::Close, true) => {
                SMBCloseResponse::parse(input).map(SMBBody::CloseResponse)
            }
            (SMBCommandCode::Read, false) => SMBReadRequest::parse(input).map(SMBBody::ReadRequest),
            (SMBCommandCode::Read, true) => {
                SMBReadResponse::parse(input).map(SMBBody::ReadResponse)
            }
            (SMBCommandCode::Write, false) => {
                SMBWriteRequest::parse(input).map(SMBBody::WriteRequest)
            }
            (SMBCommandCode::Write, true) => {
                SMBWriteResponse::parse(input).map(SMBBody::WriteResponse)
            }
            (SMBCommandCode::QueryDirectory, false) => {
                SMBQueryDirectoryRequest::parse(input).map(SMBBody::QueryDirectoryRequest)
            }
            (SMBCommandCode::QueryDirectory, true) => {
                SMBQueryDirectoryResponse::parse(input).map(SMBBody::QueryDirectoryResponse)
            }
            (SMBCommandCode::ChangeNotify, false) => {
                SMBChangeNotifyRequest::parse(input).map(SMBBody::ChangeNotifyRequest)
            }
            (SMBCommandCode::ChangeNotify, true) => {
                SMBChangeNotifyResponse::parse(input).map(SMBBody::ChangeNotifyResponse)
            }
            (SMBCommandCode::Cancel, false) => {
                SMBCancelRequest::parse(input).map(SMBBody::CancelRequest)
            }
            (SMBCommandCode::Echo, false) => SMBEchoRequest::parse(input).map(SMBBody::EchoRequest),
            (SMBCommandCode::Echo, true) => {
                SMBEchoResponse::parse(input).map(SMBBody::EchoResponse)
            }
            (SMBCommandCode::OplockBreak, true) => {
                SMBOplockBreakNotification::parse(input).map(SMBBody::OplockBreakNotification)
            }
            (command, _) => Err(SMBError::protocol_violation(format!(
                "no body decoder for {:?} (response: {})",
                command, response
            ))),
        }
    }
}

/// A response whose status is not success carries the error body in place
/// of the command body. The session setup continuation is the exception:
/// it still carries a challenge token.
fn takes_error_body(header: &SMBHeader) -> bool {
    if header.status == NTStatus::Success {
        return false;
    }
    !(header.command == SMBCommandCode::SessionSetup
        && header.status == NTStatus::MoreProcessingRequired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::SMBFlags;

    fn response_header(command: SMBCommandCode, status: NTStatus) -> SMBHeader {
        let mut header = SMBHeader::request(command, 0, 1, 1);
        header.flags |= SMBFlags::SERVER_TO_REDIR;
        header.status = status;
        header
    }

    #[test]
    fn error_status_parses_as_error_body() {
        let header = response_header(SMBCommandCode::Create, NTStatus::AccessDenied);
        let body = SMBBody::parse(&header, &SMBErrorResponse.as_bytes()).unwrap();
        assert_eq!(body, SMBBody::Error(SMBErrorResponse));
    }

    #[test]
    fn session_setup_continuation_keeps_its_body() {
        let header = response_header(SMBCommandCode::SessionSetup, NTStatus::MoreProcessingRequired);
        let inner = SMBSessionSetupResponse {
            session_flags: SessionFlags::empty(),
            security_buffer: vec![9, 9, 9],
        };
        let body = SMBBody::parse(&header, &inner.as_bytes()).unwrap();
        assert_eq!(body, SMBBody::SessionSetupResponse(inner));
    }

    #[test]
    fn read_payload_drives_credit_charge() {
        let body = SMBBody::ReadRequest(SMBReadRequest {
            file_id: FileId::new(1),
            offset: 0,
            length: 128 * 1024,
            minimum_count: 0,
        });
        assert_eq!(body.payload_size(), 128 * 1024);
        assert_eq!(SMBBody::EchoRequest(SMBEchoRequest).payload_size(), 0);
    }
}
