// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manager for public key material of other parties.
//!
//! Bundles with a one-time pre-key are handed out exactly once. When all of them are used up the
//! registry falls back to the latest bundle without one-time pre-key, if any is known.
use std::collections::HashMap;
use std::convert::Infallible;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::PublicKey;
use crate::key_bundle::{KeyBundleError, PreKeyBundle};
use crate::traits::{IdentityHandle, IdentityRegistry, PreKeyRegistry};

/// Key registry to maintain public key material of other parties we've collected.
#[derive(Clone, Debug)]
pub struct KeyRegistry<ID> {
    _marker: PhantomData<ID>,
}

/// Serializable state of key registry (for persistence).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRegistryState<ID>
where
    ID: IdentityHandle,
{
    identities: HashMap<ID, PublicKey>,
    onetime_bundles: HashMap<ID, Vec<PreKeyBundle>>,
    longterm_bundles: HashMap<ID, PreKeyBundle>,
}

impl<ID> KeyRegistry<ID>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
{
    /// Returns newly initialised key-registry state.
    pub fn init() -> KeyRegistryState<ID> {
        KeyRegistryState {
            identities: HashMap::new(),
            onetime_bundles: HashMap::new(),
            longterm_bundles: HashMap::new(),
        }
    }

    /// Adds a pre-key bundle of a party to the registry.
    ///
    /// This throws an error if the signature of the bundle is invalid or if the bundle was signed
    /// by a different identity than the one we know for this party.
    pub fn add_bundle(
        mut y: KeyRegistryState<ID>,
        id: ID,
        key_bundle: PreKeyBundle,
    ) -> Result<KeyRegistryState<ID>, KeyRegistryError> {
        key_bundle.verify()?;

        if let Some(existing) = y.identities.get(&id) {
            if existing != key_bundle.identity_key() {
                return Err(KeyRegistryError::IdentityMismatch(*existing));
            }
        }
        y.identities.insert(id.clone(), *key_bundle.identity_key());

        if key_bundle.onetime_prekey().is_some() {
            y.onetime_bundles.entry(id).or_default().push(key_bundle);
        } else {
            y.longterm_bundles.insert(id, key_bundle);
        }

        Ok(y)
    }

    /// Forgets all key material of a party, for example after they changed their identity.
    pub fn remove(mut y: KeyRegistryState<ID>, id: &ID) -> KeyRegistryState<ID> {
        y.identities.remove(id);
        y.onetime_bundles.remove(id);
        y.longterm_bundles.remove(id);
        y
    }
}

impl<ID> PreKeyRegistry<ID> for KeyRegistry<ID>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
{
    type State = KeyRegistryState<ID>;

    type Error = Infallible;

    fn key_bundle(
        mut y: Self::State,
        id: &ID,
    ) -> Result<(Self::State, Option<PreKeyBundle>), Self::Error> {
        let bundle = y
            .onetime_bundles
            .get_mut(id)
            .and_then(|bundles| bundles.pop())
            .or_else(|| y.longterm_bundles.get(id).cloned());
        Ok((y, bundle))
    }
}

impl<ID> IdentityRegistry<ID, KeyRegistryState<ID>> for KeyRegistry<ID>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
{
    type Error = Infallible;

    fn identity_key(y: &KeyRegistryState<ID>, id: &ID) -> Result<Option<PublicKey>, Self::Error> {
        Ok(y.identities.get(id).copied())
    }
}

#[derive(Debug, Error)]
pub enum KeyRegistryError {
    #[error(transparent)]
    KeyBundle(#[from] KeyBundleError),

    #[error("key bundle was signed by a different identity than {0}")]
    IdentityMismatch(PublicKey),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::xeddsa::xeddsa_sign;
    use crate::key_bundle::PreKeyBundle;
    use crate::key_manager::KeyManager;
    use crate::traits::{IdentityRegistry, PreKeyManager, PreKeyRegistry};

    use super::{KeyRegistry, KeyRegistryError};

    #[test]
    fn onetime_bundles_are_used_once() {
        let rng = Rng::from_seed([1; 32]);
        let member_id = 0u64;

        let identity_secret = rng.random_secret_key().unwrap();
        let keys = KeyManager::init(&identity_secret, &rng).unwrap();
        let (keys, onetime_bundle) = KeyManager::generate_onetime_bundle(keys, &rng).unwrap();
        let longterm_bundle = KeyManager::prekey_bundle(&keys).unwrap();

        let pki = KeyRegistry::init();
        let pki = KeyRegistry::add_bundle(pki, member_id, onetime_bundle.clone()).unwrap();
        let pki = KeyRegistry::add_bundle(pki, member_id, longterm_bundle.clone()).unwrap();

        assert_eq!(
            KeyRegistry::identity_key(&pki, &member_id).unwrap(),
            Some(identity_secret.public_key().unwrap())
        );

        // One-time bundle is preferred and handed out only once.
        let (pki, bundle) = KeyRegistry::key_bundle(pki, &member_id).unwrap();
        assert_eq!(bundle, Some(onetime_bundle));

        // Afterwards we fall back to the bundle without one-time pre-key.
        let (pki, bundle) = KeyRegistry::key_bundle(pki, &member_id).unwrap();
        assert_eq!(bundle, Some(longterm_bundle));

        // Unknown members don't have any bundles.
        let (_pki, bundle) = KeyRegistry::key_bundle(pki, &1).unwrap();
        assert!(bundle.is_none());
    }

    #[test]
    fn invalid_bundles() {
        let rng = Rng::from_seed([1; 32]);
        let member_id = 0u64;

        let identity_secret = rng.random_secret_key().unwrap();
        let keys = KeyManager::init(&identity_secret, &rng).unwrap();
        let bundle = KeyManager::prekey_bundle(&keys).unwrap();

        // Tampered signature.
        let invalid_bundle = PreKeyBundle::new(
            *bundle.identity_key(),
            crate::key_bundle::SignedPreKey::new(
                *bundle.signed_prekey(),
                bundle.signed_prekey_id(),
            ),
            xeddsa_sign(b"something else", &identity_secret, &rng).unwrap(),
            None,
        );
        assert!(matches!(
            KeyRegistry::add_bundle(KeyRegistry::init(), member_id, invalid_bundle),
            Err(KeyRegistryError::KeyBundle(_))
        ));

        // Bundle of another identity for the same member.
        let other_secret = rng.random_secret_key().unwrap();
        let other_keys = KeyManager::init(&other_secret, &rng).unwrap();
        let other_bundle = KeyManager::prekey_bundle(&other_keys).unwrap();

        let pki = KeyRegistry::add_bundle(KeyRegistry::init(), member_id, bundle).unwrap();
        assert!(matches!(
            KeyRegistry::add_bundle(pki, member_id, other_bundle),
            Err(KeyRegistryError::IdentityMismatch(_))
        ));
    }
}
