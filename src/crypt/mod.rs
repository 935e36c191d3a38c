//! The authenticated envelope wrapped around every radio frame.
//!
//! Wire layout:
//!
//! ```text
//! +----------+----------+--------+----------------------+
//! | IV       | Tag      | Length | Ciphertext           |
//! | 8 bytes  | 8 bytes  | 1 byte | `Length` bytes       |
//! +----------+----------+--------+----------------------+
//! ```
//!
//! The ciphertext is AES-128-GCM over `secret || plaintext`, zero-padded up to
//! 16 bytes when the input is shorter. The constant 8-byte secret lets a
//! receiver reject wrong-key traffic even when a forged tag happens to
//! validate, and doubles as a cheap pre-dispatch filter.

mod gcm;

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::core::{
    CryptError, ENVELOPE_HEADER_SIZE, IV_SIZE, KEY_SIZE, MAX_WIRE_FRAME, MIN_CIPHERTEXT_SIZE,
    SECRET_SIZE, TAG_SIZE,
};
use self::gcm::Aes128Gcm;

/// Encrypts and decrypts radio frames with the shared `(key, secret)` pair.
///
/// Both sides of the link are provisioned with the same material out-of-band.
pub struct EspNowCrypt {
    gcm: Aes128Gcm,
    secret: Zeroizing<[u8; SECRET_SIZE]>,
}

impl EspNowCrypt {
    /// Create a crypt instance from the 16-byte AES key and the 8-byte
    /// plaintext secret.
    pub fn new(key: &[u8; KEY_SIZE], secret: &[u8; SECRET_SIZE]) -> Self {
        Self {
            gcm: Aes128Gcm::new(key),
            secret: Zeroizing::new(*secret),
        }
    }

    /// Encrypt an inner frame into a complete wire frame.
    ///
    /// Fails on an empty plaintext and on anything that would exceed the
    /// radio MTU once enveloped.
    pub fn encrypt_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if plaintext.is_empty() {
            return Err(CryptError::EmptyPlaintext);
        }

        let length = MIN_CIPHERTEXT_SIZE.max(SECRET_SIZE + plaintext.len());
        let wire_len = ENVELOPE_HEADER_SIZE + length;
        if wire_len > MAX_WIRE_FRAME {
            return Err(CryptError::FrameTooLarge {
                wire: wire_len,
                max: MAX_WIRE_FRAME,
            });
        }

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut buf = Vec::with_capacity(length);
        buf.extend_from_slice(self.secret.as_slice());
        buf.extend_from_slice(plaintext);
        buf.resize(length, 0);

        let tag = self.gcm.encrypt(&iv, &mut buf);

        let mut wire = Vec::with_capacity(wire_len);
        wire.extend_from_slice(&iv);
        wire.extend_from_slice(&tag);
        wire.push(length as u8);
        wire.extend_from_slice(&buf);
        Ok(wire)
    }

    /// Decrypt a wire frame back into the inner frame.
    ///
    /// Rejects truncated envelopes, length fields that leave no room for the
    /// secret, failed tag verification and secret mismatches.
    pub fn decrypt_frame(&self, wire: &[u8]) -> Result<Vec<u8>, CryptError> {
        if wire.len() < ENVELOPE_HEADER_SIZE {
            return Err(CryptError::MalformedEnvelope);
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&wire[..IV_SIZE]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&wire[IV_SIZE..IV_SIZE + TAG_SIZE]);
        let length = usize::from(wire[IV_SIZE + TAG_SIZE]);

        if length <= SECRET_SIZE || wire.len() < ENVELOPE_HEADER_SIZE + length {
            return Err(CryptError::MalformedEnvelope);
        }

        let mut buf = wire[ENVELOPE_HEADER_SIZE..ENVELOPE_HEADER_SIZE + length].to_vec();
        self.gcm.decrypt(&iv, &tag, &mut buf)?;

        if !bool::from(buf[..SECRET_SIZE].ct_eq(self.secret.as_slice())) {
            return Err(CryptError::SecretMismatch);
        }

        Ok(buf.split_off(SECRET_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypt() -> EspNowCrypt {
        EspNowCrypt::new(b"0123456789ABCDEF", b"01234567")
    }

    #[test]
    fn test_envelope_roundtrip() {
        let plaintext = [0xD0, 0x11, 0x22, 0x33, 0x44];
        let wire = crypt().encrypt_frame(&plaintext).unwrap();

        // Short plaintexts pad the ciphertext up to 16 bytes.
        assert_eq!(wire.len(), ENVELOPE_HEADER_SIZE + MIN_CIPHERTEXT_SIZE);
        assert_eq!(wire[IV_SIZE + TAG_SIZE], MIN_CIPHERTEXT_SIZE as u8);

        let decrypted = crypt().decrypt_frame(&wire).unwrap();
        // The prefix is the frame that was sent; the tail is padding zeros.
        assert_eq!(&decrypted[..plaintext.len()], &plaintext);
        assert_eq!(decrypted.len(), MIN_CIPHERTEXT_SIZE - SECRET_SIZE);
    }

    #[test]
    fn test_long_plaintext_roundtrip() {
        let plaintext = vec![0xAB; 100];
        let wire = crypt().encrypt_frame(&plaintext).unwrap();
        assert_eq!(wire.len(), ENVELOPE_HEADER_SIZE + SECRET_SIZE + 100);
        assert_eq!(crypt().decrypt_frame(&wire).unwrap(), plaintext);
    }

    #[test]
    fn test_mutated_iv_rejected() {
        let wire = {
            let mut wire = crypt()
                .encrypt_frame(&[0xD0, 0x11, 0x22, 0x33, 0x44])
                .unwrap();
            wire[0] ^= 0x01;
            wire
        };
        assert!(matches!(
            crypt().decrypt_frame(&wire),
            Err(CryptError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_mutated_tag_and_ciphertext_rejected() {
        let wire = crypt().encrypt_frame(b"payload").unwrap();

        let mut bad_tag = wire.clone();
        bad_tag[IV_SIZE] ^= 0x80;
        assert!(crypt().decrypt_frame(&bad_tag).is_err());

        let mut bad_ct = wire;
        let last = bad_ct.len() - 1;
        bad_ct[last] ^= 0x80;
        assert!(crypt().decrypt_frame(&bad_ct).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sender = EspNowCrypt::new(b"0123456789ABCDEF", b"76543210");
        let wire = sender.encrypt_frame(b"payload").unwrap();
        assert!(matches!(
            crypt().decrypt_frame(&wire),
            Err(CryptError::SecretMismatch)
        ));
    }

    #[test]
    fn test_empty_plaintext_refused() {
        assert!(matches!(
            crypt().encrypt_frame(&[]),
            Err(CryptError::EmptyPlaintext)
        ));
    }

    #[test]
    fn test_oversized_plaintext_refused() {
        let too_big = vec![0u8; MAX_WIRE_FRAME];
        assert!(matches!(
            crypt().encrypt_frame(&too_big),
            Err(CryptError::FrameTooLarge { .. })
        ));

        // The largest payload that fits produces exactly the MTU.
        let max = vec![0u8; MAX_WIRE_FRAME - ENVELOPE_HEADER_SIZE - SECRET_SIZE];
        let wire = crypt().encrypt_frame(&max).unwrap();
        assert_eq!(wire.len(), MAX_WIRE_FRAME);
    }

    #[test]
    fn test_short_length_field_rejected() {
        let wire = crypt().encrypt_frame(b"payload").unwrap();

        // A length that leaves no room for the secret is refused outright.
        let mut bad = wire.clone();
        bad[IV_SIZE + TAG_SIZE] = SECRET_SIZE as u8;
        assert!(matches!(
            crypt().decrypt_frame(&bad),
            Err(CryptError::MalformedEnvelope)
        ));

        // So is a length pointing past the end of the datagram.
        let mut overrun = wire;
        overrun[IV_SIZE + TAG_SIZE] = 0xFF;
        assert!(matches!(
            crypt().decrypt_frame(&overrun),
            Err(CryptError::MalformedEnvelope)
        ));
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        assert!(crypt().decrypt_frame(&[0u8; ENVELOPE_HEADER_SIZE - 1]).is_err());
    }
}
