// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::PublicKey;
use crate::crypto::xeddsa::{XEdDSAError, XSignature, xeddsa_verify};
use crate::key_bundle::{OneTimePreKey, OneTimePreKeyId, SignedPreKey, SignedPreKeyId};

/// Published key material of a party, consumed once to establish a session with them.
///
/// The one-time pre-key is optional. Without it the initial handshake still succeeds but the
/// forward secrecy of the first messages depends on the lifetime of the signed pre-key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    identity_key: PublicKey,
    signed_prekey: SignedPreKey,
    prekey_signature: XSignature,
    onetime_prekey: Option<OneTimePreKey>,
}

impl PreKeyBundle {
    pub fn new(
        identity_key: PublicKey,
        signed_prekey: SignedPreKey,
        prekey_signature: XSignature,
        onetime_prekey: Option<OneTimePreKey>,
    ) -> Self {
        Self {
            identity_key,
            signed_prekey,
            prekey_signature,
            onetime_prekey,
        }
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn signed_prekey(&self) -> &PublicKey {
        self.signed_prekey.key()
    }

    pub fn signed_prekey_id(&self) -> SignedPreKeyId {
        self.signed_prekey.id()
    }

    pub fn prekey_signature(&self) -> &XSignature {
        &self.prekey_signature
    }

    pub fn onetime_prekey(&self) -> Option<&PublicKey> {
        self.onetime_prekey.as_ref().map(|key| key.key())
    }

    pub fn onetime_prekey_id(&self) -> Option<OneTimePreKeyId> {
        self.onetime_prekey.as_ref().map(|key| key.id())
    }

    /// Checks that the signed pre-key was signed by the identity key of this bundle.
    pub fn verify(&self) -> Result<(), KeyBundleError> {
        xeddsa_verify(
            self.signed_prekey.as_bytes(),
            &self.identity_key,
            &self.prekey_signature,
        )?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum KeyBundleError {
    #[error("invalid signature of signed pre-key: {0}")]
    InvalidSignature(#[from] XEdDSAError),
}
