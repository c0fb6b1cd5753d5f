mod connection;
pub mod id_table;
pub mod open;
pub mod search;
#[allow(clippy::module_inception)]
pub mod server;
pub mod session;
pub mod share;

pub use open::OpenFile;
pub use search::OpenSearch;
pub use server::{SMBServer, SMBServerConfig, SMBServerConfigBuilder};
pub use session::SMBSession;
pub use share::{FileStore, InMemoryFileStore, SharedResource};
