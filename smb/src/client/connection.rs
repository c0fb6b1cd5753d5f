use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use smb_dialog_core::error::SMBError;
use smb_dialog_core::logging::{debug, warn};
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::exchange::{Delivery, ExchangeTable};
use crate::client::file_store::SMBFileStore;
use crate::client::ClientConfig;
use crate::protocol::body::capabilities::Capabilities;
use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::empty::{SMBCancelRequest, SMBEchoRequest, SMBLogoffRequest};
use crate::protocol::body::negotiate::SMBNegotiateRequest;
use crate::protocol::body::session_setup::{SMBSessionSetupRequest, SessionFlags};
use crate::protocol::body::tree_connect::{SMBShareFlags, SMBTreeConnectRequest};
use crate::protocol::body::SMBBody;
use crate::protocol::header::{
    SMBCommandCode, SMBFlags, SMBHeader, SMBTransformHeader, NO_CORRELATION_ID,
};
use crate::protocol::{credit_charge, SMBMessage};
use crate::socket::framing::FramingBuffer;
use crate::socket::{SessionPacket, SessionPacketType};
use crate::util::auth::AuthMechanism;
use crate::util::crypto::smb2;

const READ_CHUNK: usize = 64 * 1024;

/// Everything the dialog knows about its negotiated and authenticated
/// state. Snapshotted per send so the reader task and senders never hold
/// the lock across IO.
#[derive(Clone, Default)]
pub(crate) struct SecurityState {
    pub dialect: Option<SMBDialect>,
    pub multi_credit: bool,
    pub session_id: u64,
    pub signing_key: Option<[u8; 16]>,
    /// Key for traffic this client sends.
    pub send_key: Option<[u8; 16]>,
    /// Key for traffic the server sends back.
    pub receive_key: Option<[u8; 16]>,
    pub encrypt_session: bool,
    pub encrypted_trees: HashSet<u32>,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
}

/// Message-id and credit accounting, guarded together so an id is never
/// assigned without the credits that cover it.
struct FlowState {
    next_message_id: u64,
    available_credits: u16,
}

pub(crate) struct DialogCore<S> {
    pub(crate) config: ClientConfig,
    writer: tokio::sync::Mutex<WriteHalf<S>>,
    flow: Mutex<FlowState>,
    security: RwLock<SecurityState>,
    exchanges: ExchangeTable,
    notifications: mpsc::UnboundedSender<SMBMessage>,
}

/// Client half of the dialog: sends requests, correlates responses, and
/// walks the negotiate / session setup / tree connect ladder.
pub struct SMBClient<S> {
    core: Arc<DialogCore<S>>,
    reader: JoinHandle<()>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<SMBMessage>>>,
}

impl SMBClient<TcpStream> {
    pub async fn connect(config: ClientConfig) -> SMBResult<Self> {
        let stream = TcpStream::connect(config.server_address.as_str()).await?;
        Ok(Self::over_stream(config, stream))
    }
}

impl<S> SMBClient<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Runs the dialog over an already-connected stream.
    pub fn over_stream(config: ClientConfig, stream: S) -> Self {
        let (reader, writer) = split(stream);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let security = SecurityState {
            max_transact_size: config.max_transact_size,
            max_read_size: config.max_read_size,
            max_write_size: config.max_write_size,
            ..SecurityState::default()
        };
        let core = Arc::new(DialogCore {
            config,
            writer: tokio::sync::Mutex::new(writer),
            flow: Mutex::new(FlowState {
                next_message_id: 0,
                available_credits: 1,
            }),
            security: RwLock::new(security),
            exchanges: ExchangeTable::default(),
            notifications: notify_tx,
        });
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&core)));
        Self {
            core,
            reader,
            notifications: Mutex::new(Some(notify_rx)),
        }
    }

    /// Server-initiated messages (oplock break notifications). Can be taken
    /// once.
    pub fn notifications(&self) -> Option<mpsc::UnboundedReceiver<SMBMessage>> {
        self.notifications
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }

    pub fn negotiated_dialect(&self) -> Option<SMBDialect> {
        self.security_snapshot().ok().and_then(|security| security.dialect)
    }

    pub async fn negotiate(&self) -> SMBResult<SMBDialect> {
        // NetBIOS transports open with a session request; the positive
        // response carries no payload and the reader discards it
        if self.core.config.transport.is_framed() {
            let session_request = SessionPacket {
                packet_type: SessionPacketType::SessionRequest,
                payload: Vec::new(),
            };
            self.write_frame(&session_request.as_bytes()).await?;
        }
        let request = SMBNegotiateRequest::new(
            self.core.config.security_mode,
            self.core.config.dialects.clone(),
        );
        let message =
            expect_success(self.send_and_wait(SMBBody::NegotiateRequest(request), 0).await?)?;
        let SMBBody::NegotiateResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "negotiate answered with the wrong body",
            ));
        };
        let framed = self.core.config.transport.is_framed();
        let dialect = response.dialect;
        let multi_credit = dialect.supports_multi_credit() && !framed;
        let large_mtu = response.capabilities.contains(Capabilities::LARGE_MTU);
        self.update_security(|security| {
            security.dialect = Some(dialect);
            security.multi_credit = multi_credit;
            security.max_transact_size =
                security.max_transact_size.min(response.max_transact_size);
            security.max_read_size = security.max_read_size.min(response.max_read_size);
            security.max_write_size = security.max_write_size.min(response.max_write_size);
            if !large_mtu {
                // without large transfers everything must fit one credit
                security.max_transact_size =
                    security.max_transact_size.min(crate::protocol::CREDIT_UNIT as u32);
                security.max_read_size =
                    security.max_read_size.min(crate::protocol::CREDIT_UNIT as u32);
                security.max_write_size =
                    security.max_write_size.min(crate::protocol::CREDIT_UNIT as u32);
            }
        })?;
        Ok(dialect)
    }

    /// Drives the token exchange to completion, then installs the signing
    /// and encryption keys derived from the agreed session key.
    pub async fn authenticate(&self, mechanism: &mut dyn AuthMechanism) -> SMBResult<u64> {
        let security_mode = self.core.config.security_mode;
        let mut token = mechanism.initial_token()?;
        let mut session_id = 0u64;
        loop {
            let request = SMBSessionSetupRequest::new(security_mode, token);
            let message = self
                .send_with_session(SMBBody::SessionSetupRequest(request), session_id, 0)
                .await?;
            match message.header.status {
                NTStatus::Success => {
                    let SMBBody::SessionSetupResponse(response) = message.body else {
                        return Err(SMBError::protocol_violation(
                            "session setup answered with the wrong body",
                        ));
                    };
                    let dialect = self.security_snapshot()?.dialect.ok_or_else(|| {
                        SMBError::protocol_violation("authenticated before negotiating")
                    })?;
                    let session_key = mechanism.session_key()?;
                    let signing_key = smb2::generate_signing_key(&session_key, dialect)?;
                    let (send_key, receive_key) = if dialect.supports_encryption() {
                        (
                            Some(smb2::client_encryption_key(&session_key)?),
                            Some(smb2::server_encryption_key(&session_key)?),
                        )
                    } else {
                        (None, None)
                    };
                    let encrypt_session = response.session_flags.contains(SessionFlags::ENCRYPT_DATA)
                        && send_key.is_some();
                    let established = message.header.session_id;
                    self.update_security(|security| {
                        security.session_id = established;
                        security.signing_key = Some(signing_key);
                        security.send_key = send_key;
                        security.receive_key = receive_key;
                        security.encrypt_session = encrypt_session;
                    })?;
                    return Ok(established);
                }
                NTStatus::MoreProcessingRequired => {
                    session_id = message.header.session_id;
                    let SMBBody::SessionSetupResponse(response) = message.body else {
                        return Err(SMBError::protocol_violation(
                            "continuation without a challenge body",
                        ));
                    };
                    token = mechanism.next_token(&response.security_buffer)?;
                }
                status => return Err(SMBError::response_error(status)),
            }
        }
    }

    pub async fn logoff(&self) -> SMBResult<()> {
        expect_success(
            self.send_and_wait(SMBBody::LogoffRequest(SMBLogoffRequest), 0)
                .await?,
        )?;
        self.update_security(|security| {
            security.session_id = 0;
            security.signing_key = None;
            security.send_key = None;
            security.receive_key = None;
            security.encrypt_session = false;
            security.encrypted_trees.clear();
        })
    }

    pub async fn echo(&self) -> SMBResult<()> {
        expect_success(
            self.send_and_wait(SMBBody::EchoRequest(SMBEchoRequest), 0)
                .await?,
        )?;
        Ok(())
    }

    pub async fn tree_connect(&self, path: &str) -> SMBResult<SMBFileStore<'_, S>> {
        let request = SMBTreeConnectRequest::new(path);
        let message = expect_success(
            self.send_and_wait(SMBBody::TreeConnectRequest(request), 0)
                .await?,
        )?;
        let SMBBody::TreeConnectResponse(response) = message.body else {
            return Err(SMBError::protocol_violation(
                "tree connect answered with the wrong body",
            ));
        };
        let tree_id = message.header.tree_id;
        if response.share_flags.contains(SMBShareFlags::ENCRYPT_DATA) {
            self.update_security(|security| {
                security.encrypted_trees.insert(tree_id);
            })?;
        }
        Ok(SMBFileStore::new(self, tree_id, response))
    }

    pub(crate) fn forget_tree(&self, tree_id: u32) -> SMBResult<()> {
        self.update_security(|security| {
            security.encrypted_trees.remove(&tree_id);
        })
    }

    pub(crate) async fn send_and_wait(&self, body: SMBBody, tree_id: u32) -> SMBResult<SMBMessage> {
        let session_id = self.security_snapshot()?.session_id;
        self.send_with_session(body, session_id, tree_id).await
    }

    pub(crate) async fn send_with_session(
        &self,
        body: SMBBody,
        session_id: u64,
        tree_id: u32,
    ) -> SMBResult<SMBMessage> {
        let (message_id, receiver) = self.submit(body, session_id, tree_id).await?;
        match timeout(self.core.config.response_timeout, receiver).await {
            Err(_) => {
                self.core.exchanges.abandon(message_id);
                Err(SMBError::correlation_timeout(message_id))
            }
            Ok(Err(_)) => Err(SMBError::response_error(NTStatus::ConnectionDisconnected)),
            Ok(Ok(message)) => Ok(message),
        }
    }

    /// Assigns a message id, charges credits, registers the waiter, and
    /// writes the sealed frame. The caller decides how long to wait.
    pub(crate) async fn submit(
        &self,
        body: SMBBody,
        session_id: u64,
        tree_id: u32,
    ) -> SMBResult<(u64, oneshot::Receiver<SMBMessage>)> {
        let command = body
            .command_code()
            .ok_or_else(|| SMBError::server_error("request body without a command"))?;
        let security = self.security_snapshot()?;
        let (message_id, charge, requested) = {
            let mut flow = self
                .core
                .flow
                .lock()
                .map_err(|_| SMBError::server_error("flow state lock poisoned"))?;
            let charge = if security.multi_credit {
                credit_charge(body.payload_size())
            } else {
                0
            };
            let consumed = charge.max(1);
            if flow.available_credits < consumed {
                return Err(SMBError::flow_control(consumed, flow.available_credits));
            }
            flow.available_credits -= consumed;
            let message_id = flow.next_message_id;
            flow.next_message_id += if security.multi_credit {
                consumed as u64
            } else {
                1
            };
            let requested = self
                .core
                .config
                .credit_watermark
                .saturating_sub(flow.available_credits)
                .max(consumed);
            (message_id, charge, requested)
        };
        let mut header = SMBHeader::request(command, message_id, session_id, tree_id);
        header.credit_charge = charge;
        header.credits = requested;
        let receiver = self.core.exchanges.register(message_id)?;
        let outbound = outbound_security(&security, command, tree_id);
        let payload = smb2::seal_message(SMBMessage::new(header, body), &outbound)?;
        let frame = SessionPacket::message(payload).as_bytes();
        if let Err(err) = self.write_frame(&frame).await {
            self.core.exchanges.abandon(message_id);
            return Err(err);
        }
        Ok((message_id, receiver))
    }

    /// A cancel rides outside the sequence: it reuses the target's message
    /// id, costs no credits, and gets no response of its own.
    pub(crate) async fn send_cancel(&self, message_id: u64, tree_id: u32) -> SMBResult<()> {
        let security = self.security_snapshot()?;
        let mut header = SMBHeader::request(
            SMBCommandCode::Cancel,
            message_id,
            security.session_id,
            tree_id,
        );
        header.credit_charge = 0;
        header.credits = 0;
        let outbound = outbound_security(&security, SMBCommandCode::Cancel, tree_id);
        let payload = smb2::seal_message(
            SMBMessage::new(header, SMBBody::CancelRequest(SMBCancelRequest)),
            &outbound,
        )?;
        self.write_frame(&SessionPacket::message(payload).as_bytes())
            .await
    }

    pub(crate) fn security_snapshot(&self) -> SMBResult<SecurityState> {
        self.core
            .security
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| SMBError::server_error("security state lock poisoned"))
    }

    fn update_security(&self, update: impl FnOnce(&mut SecurityState)) -> SMBResult<()> {
        let mut guard = self
            .core
            .security
            .write()
            .map_err(|_| SMBError::server_error("security state lock poisoned"))?;
        update(&mut guard);
        Ok(())
    }

    async fn write_frame(&self, frame: &[u8]) -> SMBResult<()> {
        let mut writer = self.core.writer.lock().await;
        writer.write_all(frame).await.map_err(SMBError::from)
    }
}

impl<S> Drop for SMBClient<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub(crate) fn expect_success(message: SMBMessage) -> SMBResult<SMBMessage> {
    if message.header.status != NTStatus::Success {
        return Err(SMBError::response_error(message.header.status));
    }
    Ok(message)
}

fn outbound_security(
    security: &SecurityState,
    command: SMBCommandCode,
    tree_id: u32,
) -> smb2::OutboundSecurity {
    // negotiate and session setup legs travel in the clear
    if matches!(
        command,
        SMBCommandCode::Negotiate | SMBCommandCode::SessionSetup
    ) {
        return smb2::OutboundSecurity::default();
    }
    if security.encrypt_session || security.encrypted_trees.contains(&tree_id) {
        if let Some(key) = security.send_key {
            return smb2::OutboundSecurity {
                sign: None,
                encrypt: Some((key, security.session_id)),
            };
        }
    }
    if let (Some(key), Some(dialect)) = (security.signing_key, security.dialect) {
        return smb2::OutboundSecurity {
            sign: Some((key, dialect)),
            encrypt: None,
        };
    }
    smb2::OutboundSecurity::default()
}

async fn read_loop<S>(mut reader: ReadHalf<S>, core: Arc<DialogCore<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut framing = FramingBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK];
    'conn: loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                framing.feed(&buf[..n]);
                loop {
                    match framing.take_packet() {
                        Ok(Some(packet)) => {
                            if packet.packet_type != SessionPacketType::SessionMessage {
                                continue;
                            }
                            if let Err(err) = handle_inbound(&core, packet.payload, &mut framing) {
                                warn!("dropping inbound message: {err}");
                                if err.is_fatal() {
                                    break 'conn;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!("framing failure: {err}");
                            break 'conn;
                        }
                    }
                }
            }
        }
    }
    core.exchanges.fail_all();
}

fn handle_inbound<S>(
    core: &DialogCore<S>,
    mut payload: Vec<u8>,
    framing: &mut FramingBuffer,
) -> SMBResult<()> {
    let mut was_encrypted = false;
    if SMBTransformHeader::is_transform(&payload) {
        let (ciphertext, transform) = SMBTransformHeader::parse(&payload)?;
        let key = {
            let security = core
                .security
                .read()
                .map_err(|_| SMBError::server_error("security state lock poisoned"))?;
            security
                .receive_key
                .ok_or_else(|| SMBError::security_error("sealed message without a receive key"))?
        };
        let decrypted = smb2::decrypt_message(&key, &transform, ciphertext)?;
        payload = decrypted;
        was_encrypted = true;
    }
    let (_, header) = SMBHeader::parse(&payload)?;
    if !header.is_response() {
        return Err(SMBError::protocol_violation(
            "server sent a message without the response flag",
        ));
    }
    if !was_encrypted && header.flags.contains(SMBFlags::SIGNED) {
        let (signing_key, dialect) = {
            let security = core
                .security
                .read()
                .map_err(|_| SMBError::server_error("security state lock poisoned"))?;
            (security.signing_key, security.dialect)
        };
        if let (Some(key), Some(dialect)) = (signing_key, dialect) {
            let mut signable = payload.clone();
            signable[48..64].fill(0);
            smb2::verify_signature(&key, dialect, &signable, &header.signature)?;
        }
    }
    let message = SMBMessage::parse(&payload)?;
    {
        let mut flow = core
            .flow
            .lock()
            .map_err(|_| SMBError::server_error("flow state lock poisoned"))?;
        flow.available_credits = flow.available_credits.saturating_add(message.header.credits);
    }
    if let SMBBody::NegotiateResponse(response) = &message.body {
        if response.capabilities.contains(Capabilities::LARGE_MTU) {
            let ceiling = response
                .max_transact_size
                .max(response.max_read_size)
                .max(response.max_write_size) as usize;
            framing.grow(ceiling + 512);
        }
    }
    if message.header.message_id == NO_CORRELATION_ID {
        match &message.body {
            SMBBody::OplockBreakNotification(_) => {
                let _ = core.notifications.send(message);
            }
            _ => debug!("discarding unsolicited uncorrelated message"),
        }
        return Ok(());
    }
    match core.exchanges.complete(message)? {
        Delivery::Completed | Delivery::Interim => Ok(()),
        Delivery::Unclaimed(message) => {
            debug!("no waiter for message id {}", message.header.message_id);
            Ok(())
        }
        Delivery::Stale => {
            debug!("response arrived after its waiter gave up");
            Ok(())
        }
    }
}
