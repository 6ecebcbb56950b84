// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manager for our own secret key material.
//!
//! Signed pre-keys should be rotated regularly. Older signed pre-key secrets are kept around for a
//! while, since pre-key messages referring to them might still be on their way.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::xeddsa::{XEdDSAError, XSignature};
use crate::crypto::{Rng, RngError};
use crate::key_bundle::{OneTimePreKey, OneTimePreKeyId, PreKeyBundle, SignedPreKey, SignedPreKeyId};
use crate::traits::{IdentityManager, PreKeyManager};

/// Key manager to maintain secret key material (like our identity key) and to generate signed
/// public pre-key bundles.
#[derive(Clone, Debug)]
pub struct KeyManager;

/// Serializable state of key manager (for persistence).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyManagerState {
    identity_secret: SecretKey,
    identity_key: PublicKey,
    signed_prekeys: HashMap<SignedPreKeyId, SignedPreKeyState>,
    signed_next_id: SignedPreKeyId,
    onetime_secrets: HashMap<OneTimePreKeyId, SecretKey>,
    onetime_next_id: OneTimePreKeyId,
}

impl KeyManagerState {
    fn latest_signed_prekey(&self) -> Option<&SignedPreKeyState> {
        self.signed_prekeys
            .values()
            .max_by_key(|state| state.prekey.id())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPreKeyState {
    prekey: SignedPreKey,
    signature: XSignature,
    secret: SecretKey,
}

impl SignedPreKeyState {
    fn init(
        identity_secret: &SecretKey,
        id: SignedPreKeyId,
        rng: &Rng,
    ) -> Result<Self, KeyManagerError> {
        let secret = rng.random_secret_key()?;
        let prekey = SignedPreKey::new(secret.public_key()?, id);
        let signature = prekey.sign(identity_secret, rng)?;

        Ok(Self {
            prekey,
            signature,
            secret,
        })
    }
}

impl KeyManager {
    /// Returns newly initialised key-manager state, holding our identity secret and a first signed
    /// pre-key which can be used to generate key-bundles.
    pub fn init(identity_secret: &SecretKey, rng: &Rng) -> Result<KeyManagerState, KeyManagerError> {
        let prekey = SignedPreKeyState::init(identity_secret, 0, rng)?;

        Ok(KeyManagerState {
            identity_key: identity_secret.public_key()?,
            identity_secret: identity_secret.clone(),
            signed_prekeys: HashMap::from([(prekey.prekey.id(), prekey)]),
            signed_next_id: 1,
            onetime_secrets: HashMap::new(),
            onetime_next_id: 0,
        })
    }

    /// Keeps only the `keep` most recent signed pre-keys. Pre-key messages referring to older ones
    /// can't be decrypted anymore.
    pub fn remove_stale(mut y: KeyManagerState, keep: usize) -> KeyManagerState {
        let mut ids: Vec<SignedPreKeyId> = y.signed_prekeys.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in ids.into_iter().skip(keep.max(1)) {
            y.signed_prekeys.remove(&id);
        }
        y
    }

    /// Number of unused one-time pre-keys. Applications can use it to decide when to publish
    /// fresh bundles.
    pub fn onetime_prekeys_count(y: &KeyManagerState) -> usize {
        y.onetime_secrets.len()
    }
}

impl IdentityManager<KeyManagerState> for KeyManager {
    fn identity_secret(y: &KeyManagerState) -> &SecretKey {
        &y.identity_secret
    }

    fn identity_key(y: &KeyManagerState) -> PublicKey {
        y.identity_key
    }
}

impl PreKeyManager for KeyManager {
    type State = KeyManagerState;

    type Error = KeyManagerError;

    /// Returns signed pre-key secret by id.
    ///
    /// Throws an error if pre-key was not found (for example because it got removed).
    fn signed_prekey_secret(
        y: &Self::State,
        id: SignedPreKeyId,
    ) -> Result<&SecretKey, Self::Error> {
        y.signed_prekeys
            .get(&id)
            .map(|state| &state.secret)
            .ok_or(KeyManagerError::UnknownSignedPreKey(id))
    }

    /// Generates a new signed pre-key which will be used for all future bundles.
    fn rotate_signed_prekey(mut y: Self::State, rng: &Rng) -> Result<Self::State, Self::Error> {
        let prekey = SignedPreKeyState::init(&y.identity_secret, y.signed_next_id, rng)?;
        y.signed_prekeys.insert(prekey.prekey.id(), prekey);
        y.signed_next_id += 1;
        Ok(y)
    }

    /// Returns latest public key-bundle without one-time pre-key.
    fn prekey_bundle(y: &Self::State) -> Result<PreKeyBundle, Self::Error> {
        y.latest_signed_prekey()
            .map(|latest| PreKeyBundle::new(y.identity_key, latest.prekey, latest.signature, None))
            .ok_or(KeyManagerError::NoPreKeysAvailable)
    }

    /// Creates a new public key-bundle with a fresh one-time pre-key.
    fn generate_onetime_bundle(
        mut y: Self::State,
        rng: &Rng,
    ) -> Result<(Self::State, PreKeyBundle), Self::Error> {
        let (prekey, signature) = {
            let latest = y
                .latest_signed_prekey()
                .ok_or(KeyManagerError::NoPreKeysAvailable)?;
            (latest.prekey, latest.signature)
        };

        let onetime_secret = rng.random_secret_key()?;
        let onetime_key = OneTimePreKey::new(onetime_secret.public_key()?, y.onetime_next_id);

        let existing = y.onetime_secrets.insert(onetime_key.id(), onetime_secret);
        assert!(existing.is_none(), "should never insert same id more than once");
        y.onetime_next_id += 1;

        let bundle = PreKeyBundle::new(y.identity_key, prekey, signature, Some(onetime_key));

        Ok((y, bundle))
    }

    /// Returns and removes the one-time pre-key secret used by a sender during X3DH.
    ///
    /// Throws an error when requested pre-key secret is unknown (and thus probably was already
    /// used once).
    fn use_onetime_secret(
        mut y: Self::State,
        id: OneTimePreKeyId,
    ) -> Result<(Self::State, SecretKey), Self::Error> {
        match y.onetime_secrets.remove(&id) {
            Some(secret) => Ok((y, secret)),
            None => Err(KeyManagerError::UnknownOneTimeSecret(id)),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    XEdDSA(#[from] XEdDSAError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error("could not find one-time pre-key secret with id {0}")]
    UnknownOneTimeSecret(OneTimePreKeyId),

    #[error("could not find signed pre-key secret with id {0}")]
    UnknownSignedPreKey(SignedPreKeyId),

    #[error("no signed pre-keys available")]
    NoPreKeysAvailable,
}
