use digest::typenum::Unsigned;
use digest::{KeyInit, Mac};
use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

/// SP 800-108 key derivation in counter mode: a 32-bit big-endian counter,
/// the label, a zero separator, the context, and the requested bit length
/// run through the PRF round by round.
pub fn derive_key<M: Mac + KeyInit>(
    key: &[u8],
    label: &[u8],
    context: &[u8],
    output_bits: u32,
) -> SMBResult<Vec<u8>> {
    let output_len = (output_bits as usize + 7) / 8;
    let block_len = <M as digest::OutputSizeUser>::OutputSize::USIZE;
    let rounds = output_len.div_ceil(block_len);
    let mut output = Vec::with_capacity(rounds * block_len);
    for counter in 1..=rounds as u32 {
        let mut prf = <M as KeyInit>::new_from_slice(key)
            .map_err(|_| SMBError::security_error("derivation key has an invalid length"))?;
        prf.update(&counter.to_be_bytes());
        prf.update(label);
        prf.update(&[0]);
        prf.update(context);
        prf.update(&output_bits.to_be_bytes());
        output.extend_from_slice(&prf.finalize().into_bytes());
    }
    output.truncate(output_len);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use hmac::Hmac;
    use sha2::Sha256;

    use super::*;

    #[test]
    fn output_is_truncated_to_the_requested_bits() {
        let derived = derive_key::<Hmac<Sha256>>(&[1; 16], b"label\x00", b"ctx\x00", 128).unwrap();
        assert_eq!(derived.len(), 16);
    }

    #[test]
    fn derivation_is_deterministic_and_label_sensitive() {
        let key = [7u8; 16];
        let a = derive_key::<Hmac<Sha256>>(&key, b"A\x00", b"ctx\x00", 128).unwrap();
        let b = derive_key::<Hmac<Sha256>>(&key, b"A\x00", b"ctx\x00", 128).unwrap();
        let c = derive_key::<Hmac<Sha256>>(&key, b"B\x00", b"ctx\x00", 128).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn long_outputs_span_multiple_rounds() {
        let derived = derive_key::<Hmac<Sha256>>(&[2; 16], b"label\x00", b"ctx\x00", 512).unwrap();
        assert_eq!(derived.len(), 64);
        assert_ne!(&derived[..32], &derived[32..]);
    }
}
