use aes::Aes128;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use cmac::Cmac;
use hmac::Hmac;
use rand::RngCore;
use sha2::Sha256;
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::header::{SMBFlags, SMBTransformHeader};
use crate::protocol::SMBMessage;
use crate::util::crypto::sp800_108;

pub const SESSION_KEY_LENGTH: usize = 16;
pub const SIGNATURE_LENGTH: usize = 16;

const SIGNING_LABEL: &[u8] = b"SMB2AESCMAC\x00";
const SIGNING_CONTEXT: &[u8] = b"SmbSign\x00";
const ENCRYPTION_LABEL: &[u8] = b"SMB2AESCCM\x00";
const CLIENT_TO_SERVER_CONTEXT: &[u8] = b"ServerIn \x00";
const SERVER_TO_CLIENT_CONTEXT: &[u8] = b"ServerOut\x00";

fn fit_key(material: &[u8]) -> [u8; SESSION_KEY_LENGTH] {
    let mut key = [0u8; SESSION_KEY_LENGTH];
    let taken = material.len().min(SESSION_KEY_LENGTH);
    key[..taken].copy_from_slice(&material[..taken]);
    key
}

/// Per-dialect signing key. 2.x signs with the session key directly; 3.x
/// derives a dedicated key from it.
pub fn generate_signing_key(
    session_key: &[u8],
    dialect: SMBDialect,
) -> SMBResult<[u8; SESSION_KEY_LENGTH]> {
    if session_key.is_empty() {
        return Err(SMBError::security_error("empty session key"));
    }
    if !dialect.is_smb3() {
        return Ok(fit_key(session_key));
    }
    let derived = sp800_108::derive_key::<Hmac<Sha256>>(
        &fit_key(session_key),
        SIGNING_LABEL,
        SIGNING_CONTEXT,
        128,
    )?;
    Ok(fit_key(&derived))
}

/// Key that protects client-to-server traffic.
pub fn client_encryption_key(session_key: &[u8]) -> SMBResult<[u8; SESSION_KEY_LENGTH]> {
    derive_encryption_key(session_key, CLIENT_TO_SERVER_CONTEXT)
}

/// Key that protects server-to-client traffic.
pub fn server_encryption_key(session_key: &[u8]) -> SMBResult<[u8; SESSION_KEY_LENGTH]> {
    derive_encryption_key(session_key, SERVER_TO_CLIENT_CONTEXT)
}

fn derive_encryption_key(
    session_key: &[u8],
    context: &[u8],
) -> SMBResult<[u8; SESSION_KEY_LENGTH]> {
    if session_key.is_empty() {
        return Err(SMBError::security_error("empty session key"));
    }
    let derived = sp800_108::derive_key::<Hmac<Sha256>>(
        &fit_key(session_key),
        ENCRYPTION_LABEL,
        context,
        128,
    )?;
    Ok(fit_key(&derived))
}

/// Signature over the message with its signature field zeroed: HMAC-SHA256
/// truncated to 16 bytes for 2.x, AES-128-CMAC for 3.x.
pub fn calculate_signature(
    signing_key: &[u8; SESSION_KEY_LENGTH],
    dialect: SMBDialect,
    signable: &[u8],
) -> SMBResult<[u8; SIGNATURE_LENGTH]> {
    use digest::Mac;
    if dialect.is_smb3() {
        let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(signing_key)
            .map_err(|_| SMBError::security_error("signing key has an invalid length"))?;
        mac.update(signable);
        let tag = mac.finalize().into_bytes();
        Ok(fit_key(&tag))
    } else {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(signing_key)
            .map_err(|_| SMBError::security_error("signing key has an invalid length"))?;
        mac.update(signable);
        let tag = mac.finalize().into_bytes();
        Ok(fit_key(&tag))
    }
}

/// Checks a received signature through the MAC's own verifier, which
/// compares in constant time.
pub fn verify_signature(
    signing_key: &[u8; SESSION_KEY_LENGTH],
    dialect: SMBDialect,
    signable: &[u8],
    expected: &[u8; SIGNATURE_LENGTH],
) -> SMBResult<()> {
    use digest::Mac;
    if dialect.is_smb3() {
        let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(signing_key)
            .map_err(|_| SMBError::security_error("signing key has an invalid length"))?;
        mac.update(signable);
        mac.verify_truncated_left(expected)
            .map_err(|_| SMBError::security_error("message signature mismatch"))
    } else {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(signing_key)
            .map_err(|_| SMBError::security_error("signing key has an invalid length"))?;
        mac.update(signable);
        mac.verify_truncated_left(expected)
            .map_err(|_| SMBError::security_error("message signature mismatch"))
    }
}

/// Encrypts a whole serialized message under AES-128-GCM and returns the
/// transform header followed by the ciphertext, ready for framing. The
/// first 12 bytes of the nonce field feed the cipher; the tag lands in the
/// signature field.
pub fn encrypt_message(
    key: &[u8; SESSION_KEY_LENGTH],
    nonce: [u8; 16],
    session_id: u64,
    plaintext: &[u8],
) -> SMBResult<Vec<u8>> {
    let mut header = SMBTransformHeader::new(nonce, plaintext.len() as u32, session_id);
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|_| SMBError::security_error("encryption key has an invalid length"))?;
    let aad = header.associated_data();
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce[..12]),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| SMBError::security_error("message encryption failed"))?;
    // encrypt() appends the tag; it belongs in the header's signature field
    let tag_start = sealed.len() - SIGNATURE_LENGTH;
    header.signature.copy_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);

    let mut out = header.as_bytes();
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Reverses `encrypt_message` given a parsed transform header and the
/// ciphertext that followed it. Fails when the tag does not authenticate
/// the header and payload.
pub fn decrypt_message(
    key: &[u8; SESSION_KEY_LENGTH],
    header: &SMBTransformHeader,
    ciphertext: &[u8],
) -> SMBResult<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|_| SMBError::security_error("decryption key has an invalid length"))?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + SIGNATURE_LENGTH);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(&header.signature);
    let aad = header.associated_data();
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&header.nonce[..12]),
            Payload {
                msg: &sealed,
                aad: &aad,
            },
        )
        .map_err(|_| SMBError::security_error("message failed authentication"))?;
    if plaintext.len() != header.original_message_size as usize {
        return Err(SMBError::security_error(
            "decrypted size does not match the transform header",
        ));
    }
    Ok(plaintext)
}

/// Signing or sealing parameters for one outgoing message. Encryption wins
/// when both are available: a sealed message is never also signed.
#[derive(Clone, Default)]
pub struct OutboundSecurity {
    pub sign: Option<([u8; SESSION_KEY_LENGTH], SMBDialect)>,
    pub encrypt: Option<([u8; SESSION_KEY_LENGTH], u64)>,
}

/// Serializes a message with its outgoing security transform applied:
/// sealed under the transform wrapper, signed in place, or plain.
pub fn seal_message(mut message: SMBMessage, security: &OutboundSecurity) -> SMBResult<Vec<u8>> {
    if let Some((key, session_id)) = security.encrypt {
        let plaintext = message.as_bytes();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        return encrypt_message(&key, nonce, session_id, &plaintext);
    }
    if let Some((key, dialect)) = security.sign {
        message.header.flags |= SMBFlags::SIGNED;
        message.header.signature = [0; 16];
        let signature = calculate_signature(&key, dialect, &message.signable_bytes())?;
        message.header.signature = signature;
    }
    Ok(message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::{SMBBody, SMBEchoRequest};
    use crate::protocol::header::{SMBCommandCode, SMBHeader, SMBTransformHeader};

    #[test]
    fn signing_key_depends_on_dialect() {
        let session_key = [3u8; 16];
        let smb2 = generate_signing_key(&session_key, SMBDialect::V2_1_0).unwrap();
        let smb3 = generate_signing_key(&session_key, SMBDialect::V3_1_1).unwrap();
        assert_eq!(smb2, session_key);
        assert_ne!(smb3, session_key);
    }

    #[test]
    fn directional_keys_differ() {
        let session_key = [5u8; 16];
        let inbound = client_encryption_key(&session_key).unwrap();
        let outbound = server_encryption_key(&session_key).unwrap();
        assert_ne!(inbound, outbound);
    }

    #[test]
    fn signature_verifies_and_rejects_tampering() {
        let key = generate_signing_key(&[9u8; 16], SMBDialect::V3_0_0).unwrap();
        let message = b"header and body".to_vec();
        let signature = calculate_signature(&key, SMBDialect::V3_0_0, &message).unwrap();
        verify_signature(&key, SMBDialect::V3_0_0, &message, &signature).unwrap();

        let mut tampered = message.clone();
        tampered[0] ^= 0xFF;
        assert!(verify_signature(&key, SMBDialect::V3_0_0, &tampered, &signature).is_err());
    }

    #[test]
    fn hmac_signature_works_for_smb2_dialects() {
        let key = generate_signing_key(&[8u8; 16], SMBDialect::V2_0_2).unwrap();
        let signature = calculate_signature(&key, SMBDialect::V2_0_2, b"payload").unwrap();
        verify_signature(&key, SMBDialect::V2_0_2, b"payload", &signature).unwrap();
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = client_encryption_key(&[1u8; 16]).unwrap();
        let plaintext = b"an entire serialized message".to_vec();
        let wire = encrypt_message(&key, [0xAA; 16], 77, &plaintext).unwrap();

        let (ciphertext, header) = SMBTransformHeader::parse(&wire).unwrap();
        assert_eq!(header.session_id, 77);
        assert_eq!(header.original_message_size as usize, plaintext.len());
        let decrypted = decrypt_message(&key, &header, ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn sealing_prefers_encryption_over_signing() {
        let message = SMBMessage::new(
            SMBHeader::request(SMBCommandCode::Echo, 1, 9, 0),
            SMBBody::EchoRequest(SMBEchoRequest),
        );
        let key = [4u8; 16];
        let security = OutboundSecurity {
            sign: Some((key, SMBDialect::V3_1_1)),
            encrypt: Some((key, 9)),
        };
        let wire = seal_message(message.clone(), &security).unwrap();
        assert!(SMBTransformHeader::is_transform(&wire));

        let signed_only = OutboundSecurity {
            sign: Some((key, SMBDialect::V3_1_1)),
            encrypt: None,
        };
        let wire = seal_message(message, &signed_only).unwrap();
        let (_, header) = SMBHeader::parse(&wire).unwrap();
        assert!(header.flags.contains(SMBFlags::SIGNED));
        assert_ne!(header.signature, [0u8; 16]);
    }

    #[test]
    fn flipped_ciphertext_fails_authentication() {
        let key = server_encryption_key(&[1u8; 16]).unwrap();
        let wire = encrypt_message(&key, [0xBB; 16], 1, b"secret").unwrap();
        let (ciphertext, header) = SMBTransformHeader::parse(&wire).unwrap();
        let mut corrupted = ciphertext.to_vec();
        corrupted[0] ^= 0x01;
        assert!(decrypt_message(&key, &header, &corrupted).is_err());
    }
}
