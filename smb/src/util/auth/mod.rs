pub mod plain;
pub mod user;

use smb_dialog_core::SMBResult;

pub use plain::{PlainAuthMechanism, PlainAuthProvider};
pub use user::User;

/// Identity the handshake established, kept on the session for its whole
/// lifetime.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SecurityContext {
    pub user: String,
    /// Client machine name, when the mechanism reports one.
    pub machine: Option<String>,
    /// Mechanism-specific token a backend can use for authorization checks.
    pub access_token: Vec<u8>,
}

impl SecurityContext {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            machine: None,
            access_token: Vec::new(),
        }
    }
}

/// Result of feeding one security token to the server-side handshake.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AuthOutcome {
    /// Another leg is needed; the token goes back in the response buffer
    /// alongside STATUS_MORE_PROCESSING_REQUIRED.
    Continue { token: Vec<u8> },
    /// Authentication finished. The session key seeds signing and
    /// encryption key derivation.
    Complete {
        session_key: Vec<u8>,
        context: SecurityContext,
    },
}

/// Server-side authentication collaborator. The dialog engine treats the
/// tokens as opaque and only sequences the handshake.
pub trait AuthProvider: Send + Sync {
    fn begin(&self) -> Box<dyn AuthHandshake>;
}

/// One in-progress server-side handshake, created per session setup chain.
/// Handshakes live inside the connection future, which crosses threads.
pub trait AuthHandshake: Send + Sync {
    fn accept(&mut self, token: &[u8]) -> SMBResult<AuthOutcome>;
}

/// Client-side counterpart: produces the token chain and yields the session
/// key once the server reports success.
pub trait AuthMechanism: Send {
    fn initial_token(&mut self) -> SMBResult<Vec<u8>>;
    fn next_token(&mut self, challenge: &[u8]) -> SMBResult<Vec<u8>>;
    fn session_key(&self) -> SMBResult<Vec<u8>>;
}
