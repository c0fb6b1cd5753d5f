use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use smb_dialog_core::error::SMBError;
use smb_dialog_core::logging::{debug, info, warn};
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::protocol::body::capabilities::Capabilities;
use crate::protocol::body::change_notify::{
    ChangeNotifyFlags, CompletionFilter, SMBChangeNotifyRequest, SMBChangeNotifyResponse,
};
use crate::protocol::body::create::{CreateOptions, FileAttributes, SMBCreateRequest, SMBCreateResponse};
use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::empty::{
    SMBEchoResponse, SMBErrorResponse, SMBLogoffResponse, SMBTreeDisconnectResponse,
};
use crate::protocol::body::file_io::{
    SMBCloseRequest, SMBCloseResponse, SMBReadRequest, SMBReadResponse, SMBWriteRequest,
    SMBWriteResponse,
};
use crate::protocol::body::filetime::FileTime;
use crate::protocol::body::negotiate::{SMBNegotiateRequest, SMBNegotiateResponse};
use crate::protocol::body::query_directory::{SMBQueryDirectoryRequest, SMBQueryDirectoryResponse};
use crate::protocol::body::session_setup::{SMBSessionSetupResponse, SessionFlags};
use crate::protocol::body::tree_connect::{SMBTreeConnectRequest, SMBTreeConnectResponse};
use crate::protocol::body::SMBBody;
use crate::protocol::header::{SMBCommandCode, SMBFlags, SMBHeader, SMBTransformHeader};
use crate::protocol::{credit_charge, SMBMessage};
use crate::server::id_table::IdTable;
use crate::server::search::OpenSearch;
use crate::server::server::ServerShared;
use crate::server::session::SMBSession;
use crate::server::share::{normalize_path, ShareEvent};
use crate::socket::framing::FramingBuffer;
use crate::socket::SessionPacket;
use crate::socket::SessionPacketType;
use crate::util::auth::{AuthHandshake, AuthOutcome};
use crate::util::crypto::smb2;

const OUTBOUND_QUEUE_DEPTH: usize = 64;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum ConnectionState {
    Negotiating,
    Negotiated,
}

enum SessionSlot {
    Authenticating(Box<dyn AuthHandshake>),
    Ready(SMBSession),
}

/// One accepted connection: a reader loop feeding the dialog state machine,
/// with responses funneled through an outbound queue so async completions
/// can interleave with synchronous replies.
pub(crate) struct SMBConnection {
    shared: Arc<ServerShared>,
    outbound: mpsc::Sender<Vec<u8>>,
    peer: Option<SocketAddr>,
    state: ConnectionState,
    dialect: Option<SMBDialect>,
    multi_credit: bool,
    next_expected_message_id: u64,
    sessions: IdTable<SessionSlot>,
    pending_notifies: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    next_async_id: u64,
}

impl SMBConnection {
    pub(crate) async fn serve<S>(
        shared: Arc<ServerShared>,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> SMBResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = split(stream);
        let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut connection = SMBConnection {
            shared,
            outbound,
            peer,
            state: ConnectionState::Negotiating,
            dialect: None,
            multi_credit: false,
            next_expected_message_id: 0,
            sessions: IdTable::new("sessions"),
            pending_notifies: Arc::new(Mutex::new(HashMap::new())),
            next_async_id: 1,
        };
        let mut framing = FramingBuffer::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let result = 'conn: loop {
            match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    framing.feed(&buf[..n]);
                    loop {
                        match framing.take_packet() {
                            Ok(Some(packet)) => {
                                if let Err(err) =
                                    connection.handle_packet(packet, &mut framing).await
                                {
                                    if err.is_fatal() {
                                        break 'conn Err(err);
                                    }
                                    warn!("dropping request: {err}");
                                }
                            }
                            Ok(None) => break,
                            Err(err) => break 'conn Err(err),
                        }
                    }
                }
                Err(err) => break Err(SMBError::from(err)),
            }
        };
        connection.teardown();
        drop(connection);
        let _ = writer_task.await;
        result
    }

    async fn handle_packet(
        &mut self,
        packet: SessionPacket,
        framing: &mut FramingBuffer,
    ) -> SMBResult<()> {
        match packet.packet_type {
            SessionPacketType::SessionMessage => self.handle_message(packet.payload, framing).await,
            SessionPacketType::SessionRequest => {
                self.enqueue_packet(SessionPacket {
                    packet_type: SessionPacketType::PositiveSessionResponse,
                    payload: Vec::new(),
                })
                .await
            }
            SessionPacketType::SessionKeepAlive => {
                self.enqueue_packet(SessionPacket::keep_alive()).await
            }
            other => {
                debug!("ignoring session packet {other:?}");
                Ok(())
            }
        }
    }

    async fn handle_message(
        &mut self,
        mut payload: Vec<u8>,
        framing: &mut FramingBuffer,
    ) -> SMBResult<()> {
        let mut was_encrypted = false;
        if SMBTransformHeader::is_transform(&payload) {
            let (ciphertext, transform) = SMBTransformHeader::parse(&payload)?;
            let key = self.inbound_key(transform.session_id)?;
            payload = smb2::decrypt_message(&key, &transform, ciphertext)?;
            was_encrypted = true;
        }
        let (_, header) = SMBHeader::parse(&payload)?;
        if header.is_response() {
            return Err(SMBError::protocol_violation(
                "client sent a message with the response flag set",
            ));
        }
        if !was_encrypted && header.flags.contains(SMBFlags::SIGNED) {
            let (key, dialect) = self.signing_key(header.session_id)?;
            let mut signable = payload.clone();
            signable[48..64].fill(0);
            smb2::verify_signature(&key, dialect, &signable, &header.signature)?;
        }
        let message = SMBMessage::parse(&payload)?;
        let request_header = message.header.clone();
        if message.header.command != SMBCommandCode::Cancel {
            self.validate_sequence(&message)?;
        }
        match self.dispatch(message, framing).await {
            Ok(Some(response)) => self.send_message(response).await,
            Ok(None) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!(
                    "{:?} request {} failed: {err}",
                    request_header.command, request_header.message_id
                );
                let status = status_for(&err);
                let response_header =
                    request_header.create_response_header(status, request_header.credits.max(1));
                self.send_message(SMBMessage::new(
                    response_header,
                    SMBBody::Error(SMBErrorResponse),
                ))
                .await
            }
        }
    }

    /// Message ids must arrive in sequence; each request consumes the id
    /// range its charge covers on multi-credit dialects and exactly one id
    /// otherwise.
    fn validate_sequence(&mut self, message: &SMBMessage) -> SMBResult<()> {
        let header = &message.header;
        if header.message_id != self.next_expected_message_id {
            return Err(SMBError::protocol_violation(format!(
                "out-of-sequence message id {} (expected {})",
                header.message_id, self.next_expected_message_id
            )));
        }
        let advance = if self.multi_credit {
            let required = credit_charge(message.body.payload_size());
            if header.credit_charge < required {
                // still consume the id so the dialog can continue
                self.next_expected_message_id += 1;
                return Err(SMBError::response_error(NTStatus::InvalidParameter));
            }
            header.credit_charge.max(1) as u64
        } else {
            1
        };
        self.next_expected_message_id += advance;
        Ok(())
    }

    async fn dispatch(
        &mut self,
        message: SMBMessage,
        framing: &mut FramingBuffer,
    ) -> SMBResult<Option<SMBMessage>> {
        let header = message.header;
        let granted = header.credits.max(1);
        match message.body {
            SMBBody::NegotiateRequest(request) => {
                self.negotiate(&header, request, framing, granted)
            }
            SMBBody::SessionSetupRequest(request) => {
                self.session_setup(&header, &request.security_buffer, granted)
            }
            SMBBody::LogoffRequest(_) => self.logoff(&header, granted),
            SMBBody::TreeConnectRequest(request) => self.tree_connect(&header, request, granted),
            SMBBody::TreeDisconnectRequest(_) => self.tree_disconnect(&header, granted),
            SMBBody::CreateRequest(request) => self.create(&header, request, granted),
            SMBBody::CloseRequest(request) => self.close(&header, request, granted),
            SMBBody::ReadRequest(request) => self.read(&header, request, granted),
            SMBBody::WriteRequest(request) => self.write(&header, request, granted),
            SMBBody::QueryDirectoryRequest(request) => {
                self.query_directory(&header, request, granted)
            }
            SMBBody::ChangeNotifyRequest(request) => {
                self.change_notify(&header, request, granted).await?;
                Ok(None)
            }
            SMBBody::CancelRequest(_) => {
                self.cancel(&header);
                Ok(None)
            }
            SMBBody::EchoRequest(_) => Ok(Some(SMBMessage::new(
                header.create_response_header(NTStatus::Success, granted),
                SMBBody::EchoResponse(SMBEchoResponse),
            ))),
            _ => Err(SMBError::response_error(NTStatus::NotSupported)),
        }
    }

    fn negotiate(
        &mut self,
        header: &SMBHeader,
        request: SMBNegotiateRequest,
        framing: &mut FramingBuffer,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        if self.state != ConnectionState::Negotiating {
            return Err(SMBError::response_error(NTStatus::RequestNotAccepted));
        }
        let config = &self.shared.config;
        let dialect = request
            .dialects
            .iter()
            .filter(|dialect| config.dialects.contains(dialect))
            .max()
            .copied()
            .ok_or_else(|| SMBError::response_error(NTStatus::NotSupported))?;
        self.dialect = Some(dialect);
        self.multi_credit = dialect.supports_multi_credit() && !config.transport.is_framed();
        let mut capabilities = Capabilities::empty();
        if self.multi_credit && request.capabilities.contains(Capabilities::LARGE_MTU) {
            capabilities |= Capabilities::LARGE_MTU;
            let ceiling = config
                .max_transact_size
                .max(config.max_read_size)
                .max(config.max_write_size) as usize;
            framing.grow(ceiling + 512);
        }
        if dialect.supports_encryption() {
            capabilities |= Capabilities::ENCRYPTION;
        }
        self.state = ConnectionState::Negotiated;
        info!("negotiated dialect {dialect:?}");
        let body = SMBNegotiateResponse {
            security_mode: config.security_mode,
            dialect,
            server_guid: self.shared.guid,
            capabilities,
            max_transact_size: config.max_transact_size,
            max_read_size: config.max_read_size,
            max_write_size: config.max_write_size,
            system_time: FileTime::now(),
            security_buffer: Vec::new(),
        };
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::NegotiateResponse(body),
        )))
    }

    fn session_setup(
        &mut self,
        header: &SMBHeader,
        token: &[u8],
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        if self.state != ConnectionState::Negotiated {
            return Err(SMBError::response_error(NTStatus::RequestNotAccepted));
        }
        let session_id = if header.session_id == 0 {
            self.sessions
                .insert(SessionSlot::Authenticating(self.shared.provider.begin()))?
        } else {
            header.session_id
        };
        let dialect = self
            .dialect
            .ok_or_else(|| SMBError::protocol_violation("session setup before negotiate"))?;
        let slot = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SMBError::not_found("session", session_id))?;
        let SessionSlot::Authenticating(handshake) = slot else {
            return Err(SMBError::response_error(NTStatus::RequestNotAccepted));
        };
        match handshake.accept(token) {
            Ok(AuthOutcome::Continue { token }) => {
                let mut response_header =
                    header.create_response_header(NTStatus::MoreProcessingRequired, granted);
                response_header.session_id = session_id;
                Ok(Some(SMBMessage::new(
                    response_header,
                    SMBBody::SessionSetupResponse(SMBSessionSetupResponse {
                        session_flags: SessionFlags::empty(),
                        security_buffer: token,
                    }),
                )))
            }
            Ok(AuthOutcome::Complete {
                session_key,
                context,
            }) => {
                info!("session {session_id} established for {}", context.user);
                let session = SMBSession::new(
                    session_id,
                    context,
                    self.peer,
                    &session_key,
                    dialect,
                    self.shared.config.require_encryption,
                )?;
                let session_flags = if session.encrypt_data {
                    SessionFlags::ENCRYPT_DATA
                } else {
                    SessionFlags::empty()
                };
                *slot = SessionSlot::Ready(session);
                let mut response_header =
                    header.create_response_header(NTStatus::Success, granted);
                response_header.session_id = session_id;
                Ok(Some(SMBMessage::new(
                    response_header,
                    SMBBody::SessionSetupResponse(SMBSessionSetupResponse {
                        session_flags,
                        security_buffer: Vec::new(),
                    }),
                )))
            }
            Err(err) => {
                debug!("authentication failed: {err}");
                self.sessions.remove(session_id);
                Err(SMBError::response_error(NTStatus::LogonFailure))
            }
        }
    }

    fn logoff(&mut self, header: &SMBHeader, granted: u16) -> SMBResult<Option<SMBMessage>> {
        match self.sessions.remove(header.session_id) {
            Some(SessionSlot::Ready(mut session)) => session.close(),
            Some(SessionSlot::Authenticating(_)) => {}
            None => return Err(SMBError::not_found("session", header.session_id)),
        }
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::LogoffResponse(SMBLogoffResponse),
        )))
    }

    fn tree_connect(
        &mut self,
        header: &SMBHeader,
        request: SMBTreeConnectRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        let share = self
            .shared
            .shares
            .get(request.share_name())
            .cloned()
            .ok_or_else(|| SMBError::response_error(NTStatus::BadNetworkName))?;
        let session = self.ready_session_mut(header.session_id)?;
        let tree_id = session.connect_tree(Arc::clone(&share))?;
        let mut response_header = header.create_response_header(NTStatus::Success, granted);
        response_header.tree_id = tree_id;
        Ok(Some(SMBMessage::new(
            response_header,
            SMBBody::TreeConnectResponse(SMBTreeConnectResponse {
                share_type: share.share_type,
                share_flags: share.flags,
                maximal_access: share.maximal_access,
            }),
        )))
    }

    fn tree_disconnect(
        &mut self,
        header: &SMBHeader,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        let session = self.ready_session_mut(header.session_id)?;
        session.disconnect_tree(header.tree_id)?;
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::TreeDisconnectResponse(SMBTreeDisconnectResponse),
        )))
    }

    fn create(
        &mut self,
        header: &SMBHeader,
        request: SMBCreateRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        let session = self.ready_session_mut(header.session_id)?;
        let store = Arc::clone(&session.tree(header.tree_id)?.share.store);
        let (create_action, metadata) = store.create(&request)?;
        let is_directory = metadata.file_attributes.contains(FileAttributes::DIRECTORY);
        let file_id = session.open_file(
            header.tree_id,
            normalize_path(&request.name),
            request.desired_access,
            is_directory,
            request.create_options.contains(CreateOptions::DELETE_ON_CLOSE),
        )?;
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::CreateResponse(SMBCreateResponse {
                create_action,
                creation_time: metadata.creation_time,
                last_write_time: metadata.last_write_time,
                end_of_file: metadata.end_of_file,
                file_attributes: metadata.file_attributes,
                file_id,
            }),
        )))
    }

    fn close(
        &mut self,
        header: &SMBHeader,
        request: SMBCloseRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        let session = self.ready_session_mut(header.session_id)?;
        let open = session.close_file(&request.file_id)?;
        let store = Arc::clone(&session.tree(open.tree_id)?.share.store);
        let metadata = store.close(&open.path, open.delete_on_close)?;
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::CloseResponse(SMBCloseResponse {
                end_of_file: metadata.end_of_file,
                file_attributes: metadata.file_attributes,
            }),
        )))
    }

    fn read(
        &mut self,
        header: &SMBHeader,
        request: SMBReadRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        if request.length > self.shared.config.max_read_size {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let session = self.ready_session_mut(header.session_id)?;
        let open = session.file(&request.file_id)?;
        if !open.access.grants_read() {
            return Err(SMBError::response_error(NTStatus::AccessDenied));
        }
        let path = open.path.clone();
        let store = Arc::clone(&session.tree(open.tree_id)?.share.store);
        let data = store.read(&path, request.offset, request.length)?;
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::ReadResponse(SMBReadResponse { data }),
        )))
    }

    fn write(
        &mut self,
        header: &SMBHeader,
        request: SMBWriteRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        if request.data.len() > self.shared.config.max_write_size as usize {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let session = self.ready_session_mut(header.session_id)?;
        let open = session.file(&request.file_id)?;
        if !open.access.grants_write() {
            return Err(SMBError::response_error(NTStatus::AccessDenied));
        }
        let path = open.path.clone();
        let store = Arc::clone(&session.tree(open.tree_id)?.share.store);
        let count = store.write(&path, request.offset, &request.data)?;
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::WriteResponse(SMBWriteResponse { count }),
        )))
    }

    fn query_directory(
        &mut self,
        header: &SMBHeader,
        request: SMBQueryDirectoryRequest,
        granted: u16,
    ) -> SMBResult<Option<SMBMessage>> {
        let session = self.ready_session_mut(header.session_id)?;
        let open = session.file(&request.file_id)?;
        if !open.is_directory {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let path = open.path.clone();
        let store = Arc::clone(&session.tree(open.tree_id)?.share.store);
        let stale = match session.search_for(&request.file_id)? {
            Some(search) => search.pattern != request.pattern,
            None => true,
        };
        if stale || request.restarts_scan() {
            let entries = store.list(&path, &request.pattern)?;
            session.attach_search(
                &request.file_id,
                OpenSearch::new(request.pattern.clone(), entries),
            )?;
        }
        let search = session
            .search_for(&request.file_id)?
            .ok_or_else(|| SMBError::server_error("directory scan disappeared"))?;
        let entries = search.take_next(request.output_buffer_length);
        if entries.is_empty() {
            return Err(SMBError::response_error(NTStatus::NoMoreFiles));
        }
        Ok(Some(SMBMessage::new(
            header.create_response_header(NTStatus::Success, granted),
            SMBBody::QueryDirectoryResponse(SMBQueryDirectoryResponse { entries }),
        )))
    }

    /// Sends the interim STATUS_PENDING response, then parks the watch in a
    /// task that produces exactly one final response: the first matching
    /// change, or STATUS_CANCELLED.
    async fn change_notify(
        &mut self,
        header: &SMBHeader,
        request: SMBChangeNotifyRequest,
        granted: u16,
    ) -> SMBResult<()> {
        let security = {
            let session = self.ready_session_mut(header.session_id)?;
            let open = session.file(&request.file_id)?;
            if !open.is_directory {
                return Err(SMBError::response_error(NTStatus::InvalidParameter));
            }
            self.outbound_security(header.session_id, header.tree_id)
        };
        let session = self.ready_session_mut(header.session_id)?;
        let open = session.file(&request.file_id)?;
        let watch_path = open.path.clone();
        let events = session.tree(open.tree_id)?.share.store.subscribe();

        let async_id = self.next_async_id;
        self.next_async_id += 1;
        let interim = header.create_interim_response(async_id, granted);
        self.send_message(SMBMessage::new(interim, SMBBody::Error(SMBErrorResponse)))
            .await?;

        let token = CancellationToken::new();
        self.pending_notifies
            .lock()
            .map_err(|_| SMBError::server_error("notify table lock poisoned"))?
            .insert(header.message_id, token.clone());
        let pending = Arc::clone(&self.pending_notifies);
        let outbound = self.outbound.clone();
        let request_header = header.clone();
        let watch_tree = request.flags.contains(ChangeNotifyFlags::WATCH_TREE);
        let filter = request.completion_filter;
        tokio::spawn(async move {
            let changes = tokio::select! {
                _ = token.cancelled() => None,
                matched = wait_for_change(events, watch_path, watch_tree, filter) => matched,
            };
            if let Ok(mut map) = pending.lock() {
                map.remove(&request_header.message_id);
            }
            let (status, body) = match changes {
                Some(change) => (
                    NTStatus::Success,
                    SMBBody::ChangeNotifyResponse(SMBChangeNotifyResponse {
                        changes: vec![change],
                    }),
                ),
                None => (NTStatus::Cancelled, SMBBody::Error(SMBErrorResponse)),
            };
            let mut final_header = request_header.create_response_header(status, 1);
            final_header.flags |= SMBFlags::ASYNC_COMMAND;
            final_header.tree_id = 0;
            final_header.async_id = async_id;
            match seal_message(SMBMessage::new(final_header, body), &security) {
                Ok(frame) => {
                    let _ = outbound.send(frame).await;
                }
                Err(err) => warn!("dropping change notification: {err}"),
            }
        });
        Ok(())
    }

    /// A cancel names the in-flight request by message id; the parked watch
    /// answers with STATUS_CANCELLED through its own task.
    fn cancel(&mut self, header: &SMBHeader) {
        if let Ok(map) = self.pending_notifies.lock() {
            if let Some(token) = map.get(&header.message_id) {
                token.cancel();
            } else {
                debug!("cancel for unknown message id {}", header.message_id);
            }
        }
    }

    fn ready_session_mut(&mut self, session_id: u64) -> SMBResult<&mut SMBSession> {
        match self.sessions.get_mut(session_id) {
            Some(SessionSlot::Ready(session)) => Ok(session),
            _ => Err(SMBError::not_found("session", session_id)),
        }
    }

    fn inbound_key(&self, session_id: u64) -> SMBResult<[u8; 16]> {
        match self.sessions.get(session_id) {
            Some(SessionSlot::Ready(session)) => session
                .inbound_key
                .ok_or_else(|| SMBError::security_error("session has no decryption key")),
            _ => Err(SMBError::security_error("encrypted message for unknown session")),
        }
    }

    fn signing_key(&self, session_id: u64) -> SMBResult<([u8; 16], SMBDialect)> {
        match self.sessions.get(session_id) {
            Some(SessionSlot::Ready(session)) => Ok((session.signing_key, session.dialect)),
            _ => Err(SMBError::security_error("signed message for unknown session")),
        }
    }

    fn outbound_security(&self, session_id: u64, tree_id: u32) -> smb2::OutboundSecurity {
        match self.sessions.get(session_id) {
            Some(SessionSlot::Ready(session)) => {
                if session.should_encrypt(tree_id) {
                    if let Some(key) = session.outbound_key {
                        return smb2::OutboundSecurity {
                            sign: None,
                            encrypt: Some((key, session.id)),
                        };
                    }
                }
                smb2::OutboundSecurity {
                    sign: Some((session.signing_key, session.dialect)),
                    encrypt: None,
                }
            }
            _ => smb2::OutboundSecurity::default(),
        }
    }

    async fn send_message(&self, message: SMBMessage) -> SMBResult<()> {
        let mut security =
            self.outbound_security(message.header.session_id, message.header.tree_id);
        // handshake responses stay in the clear even on sessions that
        // require encryption ([MS-SMB2] 3.3.4.1.4)
        if matches!(
            message.header.command,
            SMBCommandCode::Negotiate | SMBCommandCode::SessionSetup
        ) {
            if security.encrypt.take().is_some() && security.sign.is_none() {
                if let Ok((key, dialect)) = self.signing_key(message.header.session_id) {
                    security.sign = Some((key, dialect));
                }
            }
        }
        let frame = seal_message(message, &security)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| SMBError::server_error("connection writer is gone"))
    }

    async fn enqueue_packet(&self, packet: SessionPacket) -> SMBResult<()> {
        self.outbound
            .send(packet.as_bytes())
            .await
            .map_err(|_| SMBError::server_error("connection writer is gone"))
    }

    fn teardown(&mut self) {
        if let Ok(map) = self.pending_notifies.lock() {
            for token in map.values() {
                token.cancel();
            }
        }
        for (_, slot) in self.sessions.drain() {
            if let SessionSlot::Ready(mut session) = slot {
                session.close();
            }
        }
    }
}

/// Blocks on the event stream until a change under the watched directory
/// passes the completion filter.
async fn wait_for_change(
    mut events: broadcast::Receiver<ShareEvent>,
    watch_path: String,
    watch_tree: bool,
    filter: CompletionFilter,
) -> Option<crate::protocol::body::change_notify::FileNotifyInformation> {
    loop {
        match events.recv().await {
            Ok(event) => {
                let in_scope = event.parent == watch_path
                    || (watch_tree
                        && (watch_path.is_empty()
                            || event.parent.starts_with(&format!("{watch_path}\\"))));
                if in_scope && event.filter.intersects(filter) {
                    return Some(event.change);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("notify watcher lagged by {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Applies the outgoing security transform and frames the result.
fn seal_message(message: SMBMessage, security: &smb2::OutboundSecurity) -> SMBResult<Vec<u8>> {
    let payload = smb2::seal_message(message, security)?;
    Ok(SessionPacket::message(payload).as_bytes())
}

fn status_for(error: &SMBError) -> NTStatus {
    match error {
        SMBError::Response(status) => *status,
        SMBError::NotFound { kind, .. } => match *kind {
            "tree" => NTStatus::NetworkNameDeleted,
            "session" => NTStatus::UserSessionDeleted,
            _ => NTStatus::InvalidHandle,
        },
        SMBError::Security(_) => NTStatus::AccessDenied,
        SMBError::ResourceExhausted { .. } => NTStatus::InsufficientResources,
        SMBError::FlowControl { .. } => NTStatus::RequestNotAccepted,
        _ => NTStatus::InvalidParameter,
    }
}
