use std::collections::HashMap;
use std::sync::Arc;

use digest::Mac;
use hmac::Hmac;
use rand::RngCore;
use sha2::Sha256;
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::util::auth::user::User;
use crate::util::auth::{AuthHandshake, AuthMechanism, AuthOutcome, AuthProvider, SecurityContext};
use crate::util::crypto::smb2::SESSION_KEY_LENGTH;

const CHALLENGE_LENGTH: usize = 16;
const SESSION_KEY_SALT: &[u8] = b"session-key";

type HmacSha256 = Hmac<Sha256>;

fn keyed_hash(password: &str, parts: &[&[u8]]) -> SMBResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(password.as_bytes())
        .map_err(|_| SMBError::security_error("unusable password material"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn proof(password: &str, challenge: &[u8]) -> SMBResult<Vec<u8>> {
    keyed_hash(password, &[challenge])
}

fn derive_session_key(password: &str, challenge: &[u8]) -> SMBResult<Vec<u8>> {
    let mut key = keyed_hash(password, &[SESSION_KEY_SALT, challenge])?;
    key.truncate(SESSION_KEY_LENGTH);
    Ok(key)
}

/// Challenge-response provider over a static user table. The two-leg
/// exchange (name out, challenge back, proof out) exercises the same
/// continuation path a full security package would.
pub struct PlainAuthProvider {
    users: Arc<HashMap<String, String>>,
}

impl PlainAuthProvider {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.name, user.password))
            .collect();
        Self {
            users: Arc::new(users),
        }
    }
}

impl AuthProvider for PlainAuthProvider {
    fn begin(&self) -> Box<dyn AuthHandshake> {
        Box::new(PlainHandshake {
            users: Arc::clone(&self.users),
            pending: None,
        })
    }
}

struct PlainHandshake {
    users: Arc<HashMap<String, String>>,
    pending: Option<(String, [u8; CHALLENGE_LENGTH])>,
}

impl AuthHandshake for PlainHandshake {
    fn accept(&mut self, token: &[u8]) -> SMBResult<AuthOutcome> {
        match self.pending.take() {
            None => {
                let name = std::str::from_utf8(token)
                    .map_err(|_| SMBError::security_error("malformed identity token"))?
                    .to_string();
                let mut challenge = [0u8; CHALLENGE_LENGTH];
                rand::thread_rng().fill_bytes(&mut challenge);
                self.pending = Some((name, challenge));
                Ok(AuthOutcome::Continue {
                    token: challenge.to_vec(),
                })
            }
            Some((name, challenge)) => {
                // Unknown users fall through to the same failure as a bad
                // proof so the response does not leak which names exist.
                let expected = self
                    .users
                    .get(&name)
                    .map(|password| proof(password, &challenge))
                    .transpose()?;
                match expected {
                    Some(expected) if expected == token => {
                        let password = &self.users[&name];
                        // the accepted proof doubles as the access token
                        let mut context = SecurityContext::for_user(name);
                        context.access_token = token.to_vec();
                        Ok(AuthOutcome::Complete {
                            session_key: derive_session_key(password, &challenge)?,
                            context,
                        })
                    }
                    _ => Err(SMBError::security_error("authentication proof rejected")),
                }
            }
        }
    }
}

/// Client half of the plain challenge-response exchange.
pub struct PlainAuthMechanism {
    user: User,
    challenge: Option<[u8; CHALLENGE_LENGTH]>,
}

impl PlainAuthMechanism {
    pub fn new(user: User) -> Self {
        Self {
            user,
            challenge: None,
        }
    }
}

impl AuthMechanism for PlainAuthMechanism {
    fn initial_token(&mut self) -> SMBResult<Vec<u8>> {
        Ok(self.user.name.as_bytes().to_vec())
    }

    fn next_token(&mut self, challenge: &[u8]) -> SMBResult<Vec<u8>> {
        if challenge.len() != CHALLENGE_LENGTH {
            return Err(SMBError::security_error("malformed challenge token"));
        }
        let mut fixed = [0u8; CHALLENGE_LENGTH];
        fixed.copy_from_slice(challenge);
        self.challenge = Some(fixed);
        proof(&self.user.password, challenge)
    }

    fn session_key(&self) -> SMBResult<Vec<u8>> {
        let challenge = self
            .challenge
            .ok_or_else(|| SMBError::security_error("handshake has not completed"))?;
        derive_session_key(&self.user.password, &challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_handshake_agrees_on_the_session_key() {
        let provider = PlainAuthProvider::new([User::new("alice", "hunter2")]);
        let mut mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
        let mut handshake = provider.begin();

        let first = mechanism.initial_token().unwrap();
        let challenge = match handshake.accept(&first).unwrap() {
            AuthOutcome::Continue { token } => token,
            other => panic!("expected a challenge, got {other:?}"),
        };
        let second = mechanism.next_token(&challenge).unwrap();
        match handshake.accept(&second).unwrap() {
            AuthOutcome::Complete {
                session_key,
                context,
            } => {
                assert_eq!(context.user, "alice");
                assert_eq!(context.access_token, second);
                assert_eq!(session_key.len(), SESSION_KEY_LENGTH);
                assert_eq!(session_key, mechanism.session_key().unwrap());
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn wrong_password_is_rejected() {
        let provider = PlainAuthProvider::new([User::new("alice", "hunter2")]);
        let mut mechanism = PlainAuthMechanism::new(User::new("alice", "letmein"));
        let mut handshake = provider.begin();

        let first = mechanism.initial_token().unwrap();
        let AuthOutcome::Continue { token: challenge } = handshake.accept(&first).unwrap() else {
            panic!("expected a challenge");
        };
        let second = mechanism.next_token(&challenge).unwrap();
        assert!(handshake.accept(&second).is_err());
    }

    #[test]
    fn unknown_user_fails_at_the_proof_leg() {
        let provider = PlainAuthProvider::new([User::new("alice", "hunter2")]);
        let mut handshake = provider.begin();
        let outcome = handshake.accept(b"mallory").unwrap();
        assert!(matches!(outcome, AuthOutcome::Continue { .. }));
        assert!(handshake.accept(&[0u8; 32]).is_err());
    }

    #[test]
    fn session_key_before_challenge_is_an_error() {
        let mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
        assert!(mechanism.session_key().is_err());
    }
}
