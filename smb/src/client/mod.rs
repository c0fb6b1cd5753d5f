use std::time::Duration;

use derive_builder::Builder;

use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::security_mode::SecurityMode;
use crate::socket::TransportKind;

pub mod connection;
mod exchange;
pub mod file_store;

pub use connection::SMBClient;
pub use file_store::{ChangeNotifyWatch, SMBFileStore};

/// Dialog parameters for one client connection. The negotiated values can
/// only shrink from what is configured here.
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned", setter(into))]
pub struct ClientConfig {
    #[builder(default = "String::from(\"127.0.0.1:445\")")]
    pub server_address: String,
    #[builder(default)]
    pub transport: TransportKind,
    #[builder(default = "SecurityMode::SIGNING_ENABLED")]
    pub security_mode: SecurityMode,
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
    /// Deadline for one request/response exchange. Change notify waits are
    /// exempt.
    #[builder(default = "Duration::from_millis(5000)")]
    pub response_timeout: Duration,
    /// Credit balance the client asks the server to keep it topped up to.
    #[builder(default = "16")]
    pub credit_watermark: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: String::from("127.0.0.1:445"),
            transport: TransportKind::default(),
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialects: vec![
                SMBDialect::V2_0_2,
                SMBDialect::V2_1_0,
                SMBDialect::V3_0_0,
                SMBDialect::V3_0_2,
                SMBDialect::V3_1_1,
            ],
            max_transact_size: 1 << 20,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            response_timeout: Duration::from_millis(5000),
            credit_watermark: 16,
        }
    }
}
