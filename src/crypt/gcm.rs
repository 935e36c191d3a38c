//! AES-128-GCM with an 8-byte IV and an 8-byte truncated tag.
//!
//! The wire format fixes both parameters, and the high-level `aes-gcm` API
//! only exposes 12..=16 byte tags, so the mode is composed here from the same
//! RustCrypto primitives that crate builds on: AES for the block cipher,
//! `Ctr32BE` for the keystream (GCM's 32-bit big-endian counter increment) and
//! GHASH for authentication. Non-96-bit IVs derive the pre-counter block J0
//! via GHASH as specified in NIST SP 800-38D.

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::core::{CryptError, IV_SIZE, KEY_SIZE, TAG_SIZE};

type Ctr32 = ctr::Ctr32BE<Aes128>;

/// The block size of AES and GHASH.
const BLOCK_SIZE: usize = 16;

/// AES-128-GCM instance bound to one key.
pub(crate) struct Aes128Gcm {
    key: [u8; KEY_SIZE],
    /// GHASH key H = E_K(0^128).
    h: [u8; BLOCK_SIZE],
}

impl Aes128Gcm {
    pub(crate) fn new(key: &[u8; KEY_SIZE]) -> Self {
        let cipher = Aes128::new(key.into());
        let mut h = aes::Block::default();
        cipher.encrypt_block(&mut h);
        Self { key: *key, h: h.into() }
    }

    /// Encrypt `buf` in place and return the truncated tag.
    pub(crate) fn encrypt(&self, iv: &[u8; IV_SIZE], buf: &mut [u8]) -> [u8; TAG_SIZE] {
        let j0 = self.derive_j0(iv);
        let mut ctr = Ctr32::new((&self.key).into(), (&j0).into());

        // The first keystream block is E_K(J0), the tag mask; the payload is
        // encrypted with counters starting at inc32(J0).
        let mut tag_mask = [0u8; BLOCK_SIZE];
        ctr.apply_keystream(&mut tag_mask);
        ctr.apply_keystream(buf);

        let full = self.compute_tag(&tag_mask, buf);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&full[..TAG_SIZE]);
        tag
    }

    /// Verify the truncated tag over `buf` (ciphertext) and decrypt in place.
    pub(crate) fn decrypt(
        &self,
        iv: &[u8; IV_SIZE],
        tag: &[u8; TAG_SIZE],
        buf: &mut [u8],
    ) -> Result<(), CryptError> {
        let j0 = self.derive_j0(iv);
        let mut ctr = Ctr32::new((&self.key).into(), (&j0).into());

        let mut tag_mask = [0u8; BLOCK_SIZE];
        ctr.apply_keystream(&mut tag_mask);

        let expected = self.compute_tag(&tag_mask, buf);
        if !bool::from(expected[..TAG_SIZE].ct_eq(tag)) {
            return Err(CryptError::AuthenticationFailed);
        }

        ctr.apply_keystream(buf);
        Ok(())
    }

    /// J0 for a non-96-bit IV: GHASH over the zero-padded IV followed by the
    /// length block `0^64 || [len(IV)]_64`.
    fn derive_j0(&self, iv: &[u8; IV_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut ghash = GHash::new(ghash::Key::from_slice(&self.h));
        ghash.update_padded(iv);

        let mut lengths = ghash::Block::default();
        lengths[8..].copy_from_slice(&((IV_SIZE as u64) * 8).to_be_bytes());
        ghash.update(&[lengths]);

        ghash.finalize().into()
    }

    /// GHASH over the ciphertext (no AAD) and the length block, masked with
    /// E_K(J0).
    fn compute_tag(&self, tag_mask: &[u8; BLOCK_SIZE], ciphertext: &[u8]) -> [u8; BLOCK_SIZE] {
        let mut ghash = GHash::new(ghash::Key::from_slice(&self.h));
        ghash.update_padded(ciphertext);

        let mut lengths = ghash::Block::default();
        lengths[8..].copy_from_slice(&((ciphertext.len() as u64) * 8).to_be_bytes());
        ghash.update(&[lengths]);

        let mut tag: [u8; BLOCK_SIZE] = ghash.finalize().into();
        for (byte, mask) in tag.iter_mut().zip(tag_mask) {
            *byte ^= mask;
        }
        tag
    }
}

impl Drop for Aes128Gcm {
    fn drop(&mut self) {
        self.key.zeroize();
        self.h.zeroize();
    }
}
