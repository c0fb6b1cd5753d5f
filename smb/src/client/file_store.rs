use std::fmt;

use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::client::connection::{expect_success, SMBClient};
use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::change_notify::{
    ChangeNotifyFlags, CompletionFilter, FileNotifyInformation, SMBChangeNotifyRequest,
};
use crate::protocol::body::create::{
    CreateDisposition, CreateOptions, FileId, SMBCreateRequest, SMBCreateResponse, ShareAccess,
};
use crate::protocol::body::empty::SMBTreeDisconnectRequest;
use crate::protocol::body::file_io::{
    SMBCloseRequest, SMBCloseResponse, SMBReadRequest, SMBWriteRequest,
};
use crate::protocol::body::query_directory::{
    DirectoryEntry, QueryDirectoryFlags, SMBQueryDirectoryRequest,
};
use crate::protocol::body::tree_connect::{SMBShareFlags, SMBTreeConnectResponse, ShareType};
use crate::protocol::body::SMBBody;
use crate::protocol::{SMBMessage, CREDIT_UNIT};

/// File operations against one connected tree. Borrowing the client keeps
/// the handle from outliving its dialog.
pub struct SMBFileStore<'a, S> {
    client: &'a SMBClient<S>,
    tree_id: u32,
    info: SMBTreeConnectResponse,
}

impl<'a, S> SMBFileStore<'a, S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) fn new(
        client: &'a SMBClient<S>,
        tree_id: u32,
        info: SMBTreeConnectResponse,
    ) -> Self {
        Self {
            client,
            tree_id,
            info,
        }
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    pub fn share_type(&self) -> ShareType {
        self.info.share_type
    }

    pub fn share_flags(&self) -> SMBShareFlags {
        self.info.share_flags
    }

    pub fn maximal_access(&self) -> AccessMask {
        self.info.maximal_access
    }

    pub async fn create(&self, request: SMBCreateRequest) -> SMBResult<SMBCreateResponse> {
        let message = self.roundtrip(SMBBody::CreateRequest(request)).await?;
        let SMBBody::CreateResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "create answered with the wrong body",
            ));
        };
        Ok(response)
    }

    /// Opens an existing file without creating it.
    pub async fn open_file(
        &self,
        name: &str,
        desired_access: AccessMask,
    ) -> SMBResult<SMBCreateResponse> {
        self.create(SMBCreateRequest {
            desired_access,
            share_access: ShareAccess::READ | ShareAccess::WRITE,
            create_disposition: CreateDisposition::Open,
            create_options: CreateOptions::NON_DIRECTORY_FILE,
            name: name.to_string(),
        })
        .await
    }

    /// Opens a file, creating it when absent.
    pub async fn create_file(
        &self,
        name: &str,
        desired_access: AccessMask,
    ) -> SMBResult<SMBCreateResponse> {
        self.create(SMBCreateRequest {
            desired_access,
            share_access: ShareAccess::READ | ShareAccess::WRITE,
            create_disposition: CreateDisposition::OpenIf,
            create_options: CreateOptions::NON_DIRECTORY_FILE,
            name: name.to_string(),
        })
        .await
    }

    pub async fn open_directory(&self, name: &str) -> SMBResult<SMBCreateResponse> {
        self.create(SMBCreateRequest {
            desired_access: AccessMask::GENERIC_READ,
            share_access: ShareAccess::READ,
            create_disposition: CreateDisposition::OpenIf,
            create_options: CreateOptions::DIRECTORY_FILE,
            name: name.to_string(),
        })
        .await
    }

    /// Reads at most one negotiated chunk starting at `offset`. The server
    /// clamps reads past end of file; reading at it fails with
    /// `STATUS_END_OF_FILE`.
    pub async fn read(&self, file_id: FileId, offset: u64, length: u32) -> SMBResult<Vec<u8>> {
        let length = length.min(self.client.security_snapshot()?.max_read_size);
        let request = SMBReadRequest {
            file_id,
            offset,
            length,
            minimum_count: 0,
        };
        let message = self.roundtrip(SMBBody::ReadRequest(request)).await?;
        let SMBBody::ReadResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "read answered with the wrong body",
            ));
        };
        Ok(response.data)
    }

    /// Writes one chunk, returning the count the server accepted. Data
    /// beyond the negotiated write size is refused rather than split.
    pub async fn write(&self, file_id: FileId, offset: u64, data: Vec<u8>) -> SMBResult<u32> {
        let ceiling = self.client.security_snapshot()?.max_write_size as usize;
        if data.len() > ceiling {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let request = SMBWriteRequest {
            file_id,
            offset,
            data,
        };
        let message = self.roundtrip(SMBBody::WriteRequest(request)).await?;
        let SMBBody::WriteResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "write answered with the wrong body",
            ));
        };
        Ok(response.count)
    }

    pub async fn close(&self, file_id: FileId) -> SMBResult<SMBCloseResponse> {
        let message = self
            .roundtrip(SMBBody::CloseRequest(SMBCloseRequest { file_id }))
            .await?;
        let SMBBody::CloseResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "close answered with the wrong body",
            ));
        };
        Ok(response)
    }

    /// Lists a directory handle to exhaustion: the first leg restarts the
    /// scan, the rest continue it until the server reports no more files.
    pub async fn list(&self, file_id: FileId, pattern: &str) -> SMBResult<Vec<DirectoryEntry>> {
        let output_buffer_length = self.client.security_snapshot()?.max_transact_size;
        let mut entries = Vec::new();
        let mut flags = QueryDirectoryFlags::RESTART_SCANS;
        loop {
            let request = SMBQueryDirectoryRequest {
                flags,
                file_id,
                pattern: pattern.to_string(),
                output_buffer_length,
            };
            let message = self
                .send(SMBBody::QueryDirectoryRequest(request))
                .await?;
            match message.header.status {
                NTStatus::Success => {
                    let SMBBody::QueryDirectoryResponse(response) = message.body else {
                        return Err(SMBError::protocol_violation(
                            "directory query answered with the wrong body",
                        ));
                    };
                    entries.extend(response.entries);
                    flags = QueryDirectoryFlags::empty();
                }
                NTStatus::NoMoreFiles => return Ok(entries),
                status => return Err(SMBError::response_error(status)),
            }
        }
    }

    /// Arms a change watch on a directory handle. The request stays pending
    /// on the server until a matching change fires or the watch is
    /// cancelled; `ChangeNotifyWatch::wait` collects the outcome.
    pub async fn watch(
        &self,
        file_id: FileId,
        completion_filter: CompletionFilter,
        watch_tree: bool,
    ) -> SMBResult<ChangeNotifyWatch<'a, S>> {
        let flags = if watch_tree {
            ChangeNotifyFlags::WATCH_TREE
        } else {
            ChangeNotifyFlags::empty()
        };
        // one credit unit is plenty for notification records and keeps the
        // long-lived watch from draining the credit window
        let output_buffer_length = self
            .client
            .security_snapshot()?
            .max_transact_size
            .min(CREDIT_UNIT as u32);
        let request = SMBChangeNotifyRequest {
            flags,
            output_buffer_length,
            file_id,
            completion_filter,
        };
        let session_id = self.client.security_snapshot()?.session_id;
        let (message_id, receiver) = self
            .client
            .submit(SMBBody::ChangeNotifyRequest(request), session_id, self.tree_id)
            .await?;
        Ok(ChangeNotifyWatch {
            client: self.client,
            tree_id: self.tree_id,
            message_id,
            receiver,
        })
    }

    /// Tears the tree down. Open handles under it are invalidated by the
    /// server.
    pub async fn disconnect(self) -> SMBResult<()> {
        expect_success(
            self.roundtrip(SMBBody::TreeDisconnectRequest(SMBTreeDisconnectRequest))
                .await?,
        )?;
        self.client.forget_tree(self.tree_id)
    }

    async fn roundtrip(&self, body: SMBBody) -> SMBResult<SMBMessage> {
        expect_success(self.send(body).await?)
    }

    async fn send(&self, body: SMBBody) -> SMBResult<SMBMessage> {
        self.client.send_and_wait(body, self.tree_id).await
    }
}

impl<S> fmt::Debug for SMBFileStore<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SMBFileStore")
            .field("tree_id", &self.tree_id)
            .field("share_type", &self.info.share_type)
            .field("share_flags", &self.info.share_flags)
            .finish_non_exhaustive()
    }
}

/// One armed change-notify exchange. Waiting consumes the watch; the
/// eventual response is either the matched changes or `STATUS_CANCELLED`.
pub struct ChangeNotifyWatch<'a, S> {
    client: &'a SMBClient<S>,
    tree_id: u32,
    message_id: u64,
    receiver: oneshot::Receiver<SMBMessage>,
}

impl<S> ChangeNotifyWatch<'_, S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Blocks until the watch completes. There is no deadline: an idle
    /// directory legitimately keeps the exchange pending forever.
    pub async fn wait(self) -> SMBResult<Vec<FileNotifyInformation>> {
        let message = self
            .receiver
            .await
            .map_err(|_| SMBError::response_error(NTStatus::ConnectionDisconnected))?;
        match message.header.status {
            NTStatus::Success => {
                let SMBBody::ChangeNotifyResponse(response) = message.body else {
                    return Err(SMBError::protocol_violation(
                        "change notify answered with the wrong body",
                    ));
                };
                Ok(response.changes)
            }
            status => Err(SMBError::response_error(status)),
        }
    }

    /// Asks the server to complete the watch with `STATUS_CANCELLED`. The
    /// final response still arrives through `wait`.
    pub async fn cancel(&self) -> SMBResult<()> {
        self.client.send_cancel(self.message_id, self.tree_id).await
    }
}
