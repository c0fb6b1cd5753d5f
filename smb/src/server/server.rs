use std::collections::HashMap;
use std::sync::Arc;

use derive_builder::Builder;
use smb_dialog_core::logging::{info, warn};
use smb_dialog_core::SMBResult;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::security_mode::SecurityMode;
use crate::server::connection::SMBConnection;
use crate::server::share::SharedResource;
use crate::socket::TransportKind;
use crate::util::auth::AuthProvider;

#[derive(Builder, Clone)]
#[builder(pattern = "owned", setter(into))]
pub struct SMBServerConfig {
    #[builder(default = "String::from(\"127.0.0.1:445\")")]
    pub bind_address: String,
    #[builder(default)]
    pub transport: TransportKind,
    #[builder(default = "SecurityMode::SIGNING_ENABLED")]
    pub security_mode: SecurityMode,
    /// Force whole-message encryption for every authenticated session on
    /// 3.x dialects.
    #[builder(default = "false")]
    pub require_encryption: bool,
    #[builder(
        default = "vec![SMBDialect::V2_0_2, SMBDialect::V2_1_0, SMBDialect::V3_0_0, SMBDialect::V3_0_2, SMBDialect::V3_1_1]"
    )]
    pub dialects: Vec<SMBDialect>,
    #[builder(default = "1 << 20")]
    pub max_transact_size: u32,
    #[builder(default = "1 << 20")]
    pub max_read_size: u32,
    #[builder(default = "1 << 20")]
    pub max_write_size: u32,
}

/// State every connection handler shares: the immutable configuration, the
/// server identity, the auth collaborator, and the share table.
pub(crate) struct ServerShared {
    pub config: SMBServerConfig,
    pub guid: Uuid,
    pub provider: Arc<dyn AuthProvider>,
    pub shares: HashMap<String, Arc<SharedResource>>,
}

pub struct SMBServer {
    shared: Arc<ServerShared>,
}

impl SMBServer {
    pub fn new(
        config: SMBServerConfig,
        provider: Arc<dyn AuthProvider>,
        shares: impl IntoIterator<Item = SharedResource>,
    ) -> Self {
        let shares = shares
            .into_iter()
            .map(|share| (share.name.clone(), Arc::new(share)))
            .collect();
        Self {
            shared: Arc::new(ServerShared {
                config,
                guid: Uuid::new_v4(),
                provider,
                shares,
            }),
        }
    }

    /// Accept loop: one spawned handler per connection, each running its own
    /// dialog independently.
    pub async fn run(&self) -> SMBResult<()> {
        let listener = TcpListener::bind(self.shared.config.bind_address.as_str()).await?;
        info!("listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("connection from {peer}");
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(err) = SMBConnection::serve(shared, stream, Some(peer)).await {
                    warn!("connection from {peer} ended: {err}");
                }
            });
        }
    }

    /// Runs the dialog over an already-connected stream. Used to serve
    /// in-process transports.
    pub async fn serve_stream<S>(&self, stream: S) -> SMBResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        SMBConnection::serve(Arc::clone(&self.shared), stream, None).await
    }
}
