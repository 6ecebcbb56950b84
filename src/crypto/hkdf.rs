// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hashed Message Authentication Code (HMAC)-based key derivation function (HKDF) using
//! "hash-mode" with SHA256.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Derives `N` bytes of output key material.
///
/// An empty salt is treated as "no salt", which HKDF replaces with a string of zeros.
pub fn hkdf<const N: usize>(
    salt: &[u8],
    ikm: &[u8],
    info: Option<&[u8]>,
) -> Result<[u8; N], HkdfError> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hk.expand(info.unwrap_or_default(), &mut okm)
        .map_err(|_| HkdfError::InvalidArguments)?;
    Ok(okm)
}

/// Derives 64 bytes and splits them into two 256-bit keys.
///
/// This is used whenever a single derivation step yields a new root key and a chain key.
pub fn hkdf_pair(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
) -> Result<([u8; 32], [u8; 32]), HkdfError> {
    let okm: Zeroizing<[u8; 64]> = Zeroizing::new(hkdf(salt, ikm, Some(info))?);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    Ok((first, second))
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("arguments too large for hkdf")]
    InvalidArguments,
}
