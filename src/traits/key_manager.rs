// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::crypto::Rng;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::key_bundle::{OneTimePreKeyId, PreKeyBundle, SignedPreKeyId};

/// Manages our own identity secret.
pub trait IdentityManager<Y> {
    fn identity_secret(y: &Y) -> &SecretKey;

    fn identity_key(y: &Y) -> PublicKey;
}

/// Manages our own pre-key secrets to generate public key bundles.
pub trait PreKeyManager {
    type State: Clone + Debug + Serialize + for<'a> Deserialize<'a>;

    type Error: Error;

    fn signed_prekey_secret(
        y: &Self::State,
        id: SignedPreKeyId,
    ) -> Result<&SecretKey, Self::Error>;

    fn rotate_signed_prekey(y: Self::State, rng: &Rng) -> Result<Self::State, Self::Error>;

    fn prekey_bundle(y: &Self::State) -> Result<PreKeyBundle, Self::Error>;

    fn generate_onetime_bundle(
        y: Self::State,
        rng: &Rng,
    ) -> Result<(Self::State, PreKeyBundle), Self::Error>;

    /// Removes the one-time pre-key secret from the state and returns it.
    ///
    /// This is how the session layer signals consumption of a one-time pre-key.
    fn use_onetime_secret(
        y: Self::State,
        id: OneTimePreKeyId,
    ) -> Result<(Self::State, SecretKey), Self::Error>;
}
