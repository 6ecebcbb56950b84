// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20-Poly1305 authenticated encryption with additional data (AEAD) with 256-bit key,
//! 128-bit tag and extended 192-bit nonce.
//!
//! The tag is kept detached from the ciphertext as it is transmitted as its own field in ratchet
//! messages.
use chacha20poly1305::{AeadInPlace, Key, KeyInit, Tag, XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub const AEAD_KEY_SIZE: usize = 32;

pub const AEAD_NONCE_SIZE: usize = 24;

pub const AEAD_TAG_SIZE: usize = 16;

pub type AeadKey = [u8; AEAD_KEY_SIZE];

pub type AeadNonce = [u8; AEAD_NONCE_SIZE];

pub type AeadTag = [u8; AEAD_TAG_SIZE];

pub fn aead_encrypt(
    key: &AeadKey,
    plaintext: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<(Vec<u8>, AeadTag), AeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut ciphertext = Vec::from(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(
            XNonce::from_slice(&nonce),
            aad.unwrap_or_default(),
            &mut ciphertext,
        )
        .map_err(AeadError::Encrypt)?;

    let mut tag_bytes = [0u8; AEAD_TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok((ciphertext, tag_bytes))
}

pub fn aead_decrypt(
    key: &AeadKey,
    ciphertext: &[u8],
    tag: &AeadTag,
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut plaintext = Vec::from(ciphertext);

    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(&nonce),
            aad.unwrap_or_default(),
            &mut plaintext,
            Tag::from_slice(tag),
        )
        .map_err(AeadError::Decrypt)?;

    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("could not encrypt with xchacha20poly1305 aead: {0}")]
    Encrypt(chacha20poly1305::Error),

    #[error("could not decrypt with xchacha20poly1305 aead: {0}")]
    Decrypt(chacha20poly1305::Error),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{AeadError, AeadKey, AeadNonce, aead_decrypt, aead_encrypt};

    #[test]
    fn encrypt_decrypt() {
        let rng = Rng::from_seed([1; 32]);

        let key: AeadKey = rng.random_array().unwrap();
        let nonce: AeadNonce = rng.random_array().unwrap();

        let (ciphertext, tag) = aead_encrypt(&key, b"Hello, Panda!", nonce, Some(b"ad")).unwrap();
        assert_eq!(ciphertext.len(), b"Hello, Panda!".len());

        let plaintext = aead_decrypt(&key, &ciphertext, &tag, nonce, Some(b"ad")).unwrap();
        assert_eq!(plaintext, b"Hello, Panda!");
    }

    #[test]
    fn decryption_failed() {
        let rng = Rng::from_seed([1; 32]);

        let key: AeadKey = rng.random_array().unwrap();
        let nonce: AeadNonce = rng.random_array().unwrap();

        let (ciphertext, tag) = aead_encrypt(&key, b"Hello, Panda!", nonce, Some(b"ad")).unwrap();

        // Wrong key.
        let invalid_key: AeadKey = rng.random_array().unwrap();
        assert!(matches!(
            aead_decrypt(&invalid_key, &ciphertext, &tag, nonce, Some(b"ad")),
            Err(AeadError::Decrypt(_))
        ));

        // Wrong associated data.
        assert!(matches!(
            aead_decrypt(&key, &ciphertext, &tag, nonce, Some(b"other")),
            Err(AeadError::Decrypt(_))
        ));

        // Tampered tag.
        let mut invalid_tag = tag;
        invalid_tag[0] ^= 1;
        assert!(matches!(
            aead_decrypt(&key, &ciphertext, &invalid_tag, nonce, Some(b"ad")),
            Err(AeadError::Decrypt(_))
        ));
    }
}
