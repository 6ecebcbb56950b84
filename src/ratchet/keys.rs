// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::Secret;
use crate::crypto::aead::{AEAD_KEY_SIZE, AEAD_NONCE_SIZE, AeadKey, AeadNonce};
use crate::crypto::hkdf::{hkdf, hkdf_pair};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::ratchet::RatchetError;

pub const ROOT_KEY_SIZE: usize = 32;

pub const CHAIN_KEY_SIZE: usize = 32;

const ROOT_INFO: &[u8] = b"p2panda-ratchet root";

const MESSAGE_INFO: &[u8] = b"p2panda-ratchet message";

const CHAIN_INFO: &[u8] = b"p2panda-ratchet chain";

/// Root key of a session, replaced on every Diffie-Hellman ratchet step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootKey(Secret<ROOT_KEY_SIZE>);

impl RootKey {
    pub(crate) fn from_bytes(bytes: [u8; ROOT_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Mixes the Diffie-Hellman output of a ratchet key pair into the root key, yielding the next
    /// root key and the key of a fresh chain.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_secret: &SecretKey,
    ) -> Result<(RootKey, ChainKey), RatchetError> {
        let shared_secret = our_ratchet_secret.calculate_agreement(their_ratchet_key)?;
        let (root_key, chain_key) = hkdf_pair(self.0.as_bytes(), &shared_secret, ROOT_INFO)?;
        Ok((RootKey::from_bytes(root_key), ChainKey::new(chain_key, 0)))
    }
}

/// Symmetric-key ratchet state of a sending or receiving chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainKey {
    key: Secret<CHAIN_KEY_SIZE>,
    index: u32,
}

impl ChainKey {
    pub(crate) fn new(key: [u8; CHAIN_KEY_SIZE], index: u32) -> Self {
        Self {
            key: Secret::from_bytes(key),
            index,
        }
    }

    /// Counter of the next message key derived from this chain.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Advances the chain by one step.
    ///
    /// The old chain key can not be recovered from the new one.
    pub fn next(&self) -> Result<ChainKey, RatchetError> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(RatchetError::ChainExhausted)?;
        let key: [u8; CHAIN_KEY_SIZE] = hkdf(b"", self.key.as_bytes(), Some(CHAIN_INFO))?;
        Ok(ChainKey::new(key, index))
    }

    /// Derives the key and nonce to encrypt or decrypt the message at the current index.
    pub fn message_keys(&self) -> Result<MessageKeys, RatchetError> {
        let okm: Zeroizing<[u8; AEAD_KEY_SIZE + AEAD_NONCE_SIZE]> =
            Zeroizing::new(hkdf(b"", self.key.as_bytes(), Some(MESSAGE_INFO))?);

        Ok(MessageKeys {
            key: Secret::from_fn(|i| okm[i]),
            nonce: Secret::from_fn(|i| okm[AEAD_KEY_SIZE + i]),
            counter: self.index,
        })
    }
}

/// Single-use key material for exactly one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKeys {
    key: Secret<AEAD_KEY_SIZE>,
    nonce: Secret<AEAD_NONCE_SIZE>,
    counter: u32,
}

impl MessageKeys {
    pub(crate) fn key(&self) -> &AeadKey {
        self.key.as_bytes()
    }

    pub(crate) fn nonce(&self) -> AeadNonce {
        *self.nonce.as_bytes()
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}
