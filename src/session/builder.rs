// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous session setup in the style of the Extended Triple Diffie-Hellman (X3DH) key
//! agreement protocol.
//!
//! The initiator ("Alice") uses the published pre-key bundle of the responder ("Bob") to derive a
//! shared root key while Bob is offline. Bob derives the same secret as soon as he receives the
//! first pre-key message of Alice.
//!
//! Next to the three regular X3DH key agreements, both identity keys are additionally combined
//! with each other. A one-time pre-key is mixed in when the bundle carried one; without it the
//! session is established all the same, but the first messages only enjoy forward secrecy until
//! the signed pre-key gets rotated.
//!
//! Sessions can also be bootstrapped from the identity key of the other party alone ("friend
//! request"). The identity key then stands in for the signed pre-key and no one-time pre-key is
//! used. Whoever accepts these sessions needs to trust the identity key out-of-band.
//!
//! <https://signal.org/docs/specifications/x3dh/>
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::hkdf::{HkdfError, hkdf_pair};
use crate::crypto::x25519::{AGREEMENT_SIZE, PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError};
use crate::key_bundle::{KeyBundleError, OneTimePreKeyId, PreKeyBundle, SignedPreKeyId};
use crate::message::{FriendRequestMessage, PreKeyMessage};
use crate::ratchet::{
    ChainKey, PendingFriendRequest, PendingPreKey, RatchetError, RatchetState, RootKey,
    SessionKeys,
};
use crate::traits::{IdentityManager, PreKeyManager};

/// ASCII string identifying the application, used for KDF.
const KDF_INFO: &[u8] = b"p2panda-ratchet x3dh";

/// "Discontinuity bytes" placed in front of the key agreement outputs.
const DISCONTINUITY_BYTES: [u8; 32] = [0xFF; 32];

/// Establishes a session with the owner of the given pre-key bundle.
///
/// The signature of the bundle is checked before any key material gets generated or derived.
pub fn build_outgoing_session(
    our_identity_secret: &SecretKey,
    their_prekey_bundle: &PreKeyBundle,
    rng: &Rng,
) -> Result<RatchetState, BuilderError> {
    their_prekey_bundle.verify()?;

    let our_identity_key = our_identity_secret.public_key()?;
    let our_base_secret = rng.random_secret_key()?;
    let our_base_key = our_base_secret.public_key()?;

    let (root_key, chain_key) = derive_initiator_keys(
        our_identity_secret,
        &our_base_secret,
        their_prekey_bundle.identity_key(),
        their_prekey_bundle.signed_prekey(),
        their_prekey_bundle.onetime_prekey(),
    )?;

    let mut state = RatchetState::init_initiator(
        root_key,
        chain_key,
        *their_prekey_bundle.signed_prekey(),
        SessionKeys {
            local_identity_key: our_identity_key,
            remote_identity_key: *their_prekey_bundle.identity_key(),
            base_key: our_base_key,
        },
        rng,
    )?;

    state.pending_prekey = Some(PendingPreKey {
        signed_prekey_id: their_prekey_bundle.signed_prekey_id(),
        onetime_prekey_id: their_prekey_bundle.onetime_prekey_id(),
        base_key: our_base_key,
    });

    debug!(
        base_key = %our_base_key,
        their_identity_key = %their_prekey_bundle.identity_key(),
        onetime_prekey = their_prekey_bundle.onetime_prekey_id().is_some(),
        "built outgoing session"
    );

    Ok(state)
}

/// Establishes a session from the first pre-key message of an initiator.
///
/// The used one-time pre-key secret is removed from the returned key manager state.
pub fn build_incoming_session<KMG>(
    y_manager: KMG::State,
    message: &PreKeyMessage,
) -> Result<(KMG::State, RatchetState), BuilderError>
where
    KMG: IdentityManager<KMG::State> + PreKeyManager,
{
    let our_signed_prekey_secret = KMG::signed_prekey_secret(&y_manager, message.signed_prekey_id)
        .map_err(|_| BuilderError::UnknownSignedPreKey(message.signed_prekey_id))?
        .clone();

    let (y_manager_i, our_onetime_secret) = match message.onetime_prekey_id {
        Some(id) => {
            let (y_manager_i, secret) = KMG::use_onetime_secret(y_manager, id)
                .map_err(|_| BuilderError::UnknownPreKey(id))?;
            (y_manager_i, Some(secret))
        }
        None => (y_manager, None),
    };

    let our_identity_secret = KMG::identity_secret(&y_manager_i);

    let (root_key, chain_key) = derive_responder_keys(
        our_identity_secret,
        &our_signed_prekey_secret,
        our_onetime_secret.as_ref(),
        &message.identity_key,
        &message.base_key,
    )?;

    let state = RatchetState::init_responder(
        root_key,
        chain_key,
        our_signed_prekey_secret,
        SessionKeys {
            local_identity_key: KMG::identity_key(&y_manager_i),
            remote_identity_key: message.identity_key,
            base_key: message.base_key,
        },
    )?;

    debug!(
        base_key = %message.base_key,
        their_identity_key = %message.identity_key,
        signed_prekey_id = message.signed_prekey_id,
        onetime_prekey_id = ?message.onetime_prekey_id,
        "built incoming session"
    );

    Ok((y_manager_i, state))
}

/// Establishes a session with a party we only know the identity key of.
pub fn build_outgoing_friend_request_session(
    our_identity_secret: &SecretKey,
    their_identity_key: &PublicKey,
    rng: &Rng,
) -> Result<RatchetState, BuilderError> {
    let our_identity_key = our_identity_secret.public_key()?;
    let our_base_secret = rng.random_secret_key()?;
    let our_base_key = our_base_secret.public_key()?;

    let (root_key, chain_key) = derive_initiator_keys(
        our_identity_secret,
        &our_base_secret,
        their_identity_key,
        their_identity_key,
        None,
    )?;

    let mut state = RatchetState::init_initiator(
        root_key,
        chain_key,
        *their_identity_key,
        SessionKeys {
            local_identity_key: our_identity_key,
            remote_identity_key: *their_identity_key,
            base_key: our_base_key,
        },
        rng,
    )?;

    state.pending_friend_request = Some(PendingFriendRequest {
        base_key: our_base_key,
    });

    debug!(
        base_key = %our_base_key,
        %their_identity_key,
        "built outgoing friend request session"
    );

    Ok(state)
}

/// Establishes a session from the first friend-request message of an initiator.
pub fn build_incoming_friend_request_session(
    our_identity_secret: &SecretKey,
    message: &FriendRequestMessage,
) -> Result<RatchetState, BuilderError> {
    let (root_key, chain_key) = derive_responder_keys(
        our_identity_secret,
        our_identity_secret,
        None,
        &message.identity_key,
        &message.base_key,
    )?;

    let state = RatchetState::init_responder(
        root_key,
        chain_key,
        our_identity_secret.clone(),
        SessionKeys {
            local_identity_key: our_identity_secret.public_key()?,
            remote_identity_key: message.identity_key,
            base_key: message.base_key,
        },
    )?;

    debug!(
        base_key = %message.base_key,
        their_identity_key = %message.identity_key,
        "built incoming friend request session"
    );

    Ok(state)
}

fn derive_initiator_keys(
    our_identity_secret: &SecretKey,
    our_base_secret: &SecretKey,
    their_identity_key: &PublicKey,
    their_signed_prekey: &PublicKey,
    their_onetime_prekey: Option<&PublicKey>,
) -> Result<(RootKey, ChainKey), BuilderError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(AGREEMENT_SIZE * 6));
    ikm.extend_from_slice(&DISCONTINUITY_BYTES);

    // DH1 = DH(IKA, IKB)
    ikm.extend_from_slice(&our_identity_secret.calculate_agreement(their_identity_key)?);

    // DH2 = DH(IKA, SPKB)
    ikm.extend_from_slice(&our_identity_secret.calculate_agreement(their_signed_prekey)?);

    // DH3 = DH(EKA, IKB)
    ikm.extend_from_slice(&our_base_secret.calculate_agreement(their_identity_key)?);

    // DH4 = DH(EKA, SPKB)
    ikm.extend_from_slice(&our_base_secret.calculate_agreement(their_signed_prekey)?);

    // DH5 = DH(EKA, OPKB)
    if let Some(onetime_prekey) = their_onetime_prekey {
        ikm.extend_from_slice(&our_base_secret.calculate_agreement(onetime_prekey)?);
    }

    derive_keys(&ikm)
}

fn derive_responder_keys(
    our_identity_secret: &SecretKey,
    our_signed_prekey_secret: &SecretKey,
    our_onetime_secret: Option<&SecretKey>,
    their_identity_key: &PublicKey,
    their_base_key: &PublicKey,
) -> Result<(RootKey, ChainKey), BuilderError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(AGREEMENT_SIZE * 6));
    ikm.extend_from_slice(&DISCONTINUITY_BYTES);

    // DH1 = DH(IKA, IKB)
    ikm.extend_from_slice(&our_identity_secret.calculate_agreement(their_identity_key)?);

    // DH2 = DH(IKA, SPKB)
    ikm.extend_from_slice(&our_signed_prekey_secret.calculate_agreement(their_identity_key)?);

    // DH3 = DH(EKA, IKB)
    ikm.extend_from_slice(&our_identity_secret.calculate_agreement(their_base_key)?);

    // DH4 = DH(EKA, SPKB)
    ikm.extend_from_slice(&our_signed_prekey_secret.calculate_agreement(their_base_key)?);

    // DH5 = DH(EKA, OPKB)
    if let Some(our_onetime_secret) = our_onetime_secret {
        ikm.extend_from_slice(&our_onetime_secret.calculate_agreement(their_base_key)?);
    }

    derive_keys(&ikm)
}

fn derive_keys(ikm: &[u8]) -> Result<(RootKey, ChainKey), BuilderError> {
    let (root_key, chain_key) = hkdf_pair(b"", ikm, KDF_INFO)?;
    Ok((RootKey::from_bytes(root_key), ChainKey::new(chain_key, 0)))
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("invalid pre-key bundle: {0}")]
    InvalidSignature(#[from] KeyBundleError),

    #[error("unknown or already used one-time pre-key with id {0}")]
    UnknownPreKey(OneTimePreKeyId),

    #[error("unknown signed pre-key with id {0}")]
    UnknownSignedPreKey(SignedPreKeyId),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Ratchet(#[from] RatchetError),
}

#[cfg(test)]
mod tests {
    use crate::config::RatchetConfig;
    use crate::crypto::Rng;
    use crate::crypto::xeddsa::xeddsa_sign;
    use crate::key_bundle::{PreKeyBundle, SignedPreKey};
    use crate::key_manager::KeyManager;
    use crate::message::{FriendRequestMessage, PreKeyMessage};
    use crate::ratchet::DoubleRatchet;
    use crate::traits::{IdentityManager, PreKeyManager};

    use super::{
        BuilderError, build_incoming_friend_request_session, build_incoming_session,
        build_outgoing_friend_request_session, build_outgoing_session,
    };

    #[test]
    fn handshake() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();

        let alice_identity_secret = rng.random_secret_key().unwrap();

        let bob_identity_secret = rng.random_secret_key().unwrap();
        let bob_manager = KeyManager::init(&bob_identity_secret, &rng).unwrap();
        let (bob_manager, bob_bundle) =
            KeyManager::generate_onetime_bundle(bob_manager, &rng).unwrap();

        let alice = build_outgoing_session(&alice_identity_secret, &bob_bundle, &rng).unwrap();
        let pending = *alice.pending_prekey().unwrap();
        assert_eq!(pending.onetime_prekey_id, bob_bundle.onetime_prekey_id());
        assert_eq!(pending.base_key, *alice.base_key());

        let (alice, message) = DoubleRatchet::encrypt(&alice, b"Hello, Bob!", &config).unwrap();
        let prekey_message = PreKeyMessage {
            identity_key: *alice.local_identity_key(),
            base_key: pending.base_key,
            signed_prekey_id: pending.signed_prekey_id,
            onetime_prekey_id: pending.onetime_prekey_id,
            message,
        };

        let (bob_manager, bob) =
            build_incoming_session::<KeyManager>(bob_manager, &prekey_message).unwrap();
        assert_eq!(bob.base_key(), alice.base_key());
        assert_eq!(bob.local_identity_key(), &KeyManager::identity_key(&bob_manager));
        assert_eq!(bob.remote_identity_key(), alice.local_identity_key());
        assert!(bob.pending_prekey().is_none());

        let (bob, plaintext) =
            DoubleRatchet::decrypt(&bob, &prekey_message.message, &rng, &config).unwrap();
        assert_eq!(plaintext, b"Hello, Bob!");

        // One-time pre-key was consumed and can't be used for another session.
        assert_eq!(KeyManager::onetime_prekeys_count(&bob_manager), 0);
        assert!(matches!(
            build_incoming_session::<KeyManager>(bob_manager, &prekey_message),
            Err(BuilderError::UnknownPreKey(0))
        ));

        let (_bob, reply) = DoubleRatchet::encrypt(&bob, b"Hello, Alice!", &config).unwrap();
        let (_alice, plaintext) = DoubleRatchet::decrypt(&alice, &reply, &rng, &config).unwrap();
        assert_eq!(plaintext, b"Hello, Alice!");
    }

    #[test]
    fn handshake_without_onetime_prekey() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();

        let alice_identity_secret = rng.random_secret_key().unwrap();
        let bob_identity_secret = rng.random_secret_key().unwrap();
        let bob_manager = KeyManager::init(&bob_identity_secret, &rng).unwrap();
        let bob_bundle = KeyManager::prekey_bundle(&bob_manager).unwrap();

        let alice = build_outgoing_session(&alice_identity_secret, &bob_bundle, &rng).unwrap();
        let pending = *alice.pending_prekey().unwrap();
        assert!(pending.onetime_prekey_id.is_none());

        let (_alice, message) = DoubleRatchet::encrypt(&alice, b"Hi", &config).unwrap();
        let prekey_message = PreKeyMessage {
            identity_key: alice_identity_secret.public_key().unwrap(),
            base_key: pending.base_key,
            signed_prekey_id: pending.signed_prekey_id,
            onetime_prekey_id: None,
            message,
        };

        let (_bob_manager, bob) =
            build_incoming_session::<KeyManager>(bob_manager, &prekey_message).unwrap();
        let (_bob, plaintext) =
            DoubleRatchet::decrypt(&bob, &prekey_message.message, &rng, &config).unwrap();
        assert_eq!(plaintext, b"Hi");
    }

    #[test]
    fn invalid_signature() {
        let alice_rng = Rng::from_seed([1; 32]);
        let rng = Rng::from_seed([2; 32]);

        let alice_identity_secret = rng.random_secret_key().unwrap();
        let bob_identity_secret = rng.random_secret_key().unwrap();
        let bob_manager = KeyManager::init(&bob_identity_secret, &rng).unwrap();
        let bob_bundle = KeyManager::prekey_bundle(&bob_manager).unwrap();

        // Replace signed pre-key with one of an attacker, keeping the original signature.
        let attacker_prekey = rng.random_secret_key().unwrap().public_key().unwrap();
        let tampered_bundle = PreKeyBundle::new(
            *bob_bundle.identity_key(),
            SignedPreKey::new(attacker_prekey, bob_bundle.signed_prekey_id()),
            *bob_bundle.prekey_signature(),
            None,
        );
        assert!(matches!(
            build_outgoing_session(&alice_identity_secret, &tampered_bundle, &alice_rng),
            Err(BuilderError::InvalidSignature(_))
        ));

        // Signature by someone else than the identity key of the bundle.
        let forged_signature =
            xeddsa_sign(attacker_prekey.as_bytes(), &alice_identity_secret, &rng).unwrap();
        let forged_bundle = PreKeyBundle::new(
            *bob_bundle.identity_key(),
            SignedPreKey::new(attacker_prekey, bob_bundle.signed_prekey_id()),
            forged_signature,
            None,
        );
        assert!(matches!(
            build_outgoing_session(&alice_identity_secret, &forged_bundle, &alice_rng),
            Err(BuilderError::InvalidSignature(_))
        ));

        // No key material was generated before the signature got rejected.
        let untouched_rng = Rng::from_seed([1; 32]);
        assert_eq!(
            alice_rng.random_array::<32>().unwrap(),
            untouched_rng.random_array::<32>().unwrap()
        );
    }

    #[test]
    fn unknown_signed_prekey() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();

        let alice_identity_secret = rng.random_secret_key().unwrap();
        let bob_identity_secret = rng.random_secret_key().unwrap();
        let bob_manager = KeyManager::init(&bob_identity_secret, &rng).unwrap();
        let bob_bundle = KeyManager::prekey_bundle(&bob_manager).unwrap();

        let alice = build_outgoing_session(&alice_identity_secret, &bob_bundle, &rng).unwrap();
        let (_alice, message) = DoubleRatchet::encrypt(&alice, b"Hi", &config).unwrap();
        let prekey_message = PreKeyMessage {
            identity_key: alice_identity_secret.public_key().unwrap(),
            base_key: *alice.base_key(),
            signed_prekey_id: 99,
            onetime_prekey_id: None,
            message,
        };

        assert!(matches!(
            build_incoming_session::<KeyManager>(bob_manager, &prekey_message),
            Err(BuilderError::UnknownSignedPreKey(99))
        ));
    }

    #[test]
    fn friend_request() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();

        let alice_identity_secret = rng.random_secret_key().unwrap();
        let bob_identity_secret = rng.random_secret_key().unwrap();
        let bob_identity_key = bob_identity_secret.public_key().unwrap();

        let alice =
            build_outgoing_friend_request_session(&alice_identity_secret, &bob_identity_key, &rng)
                .unwrap();
        let pending = *alice.pending_friend_request().unwrap();
        assert!(alice.pending_prekey().is_none());

        let (alice, message) = DoubleRatchet::encrypt(&alice, b"Be my friend?", &config).unwrap();
        let friend_request = FriendRequestMessage {
            identity_key: alice_identity_secret.public_key().unwrap(),
            base_key: pending.base_key,
            message,
        };

        let bob =
            build_incoming_friend_request_session(&bob_identity_secret, &friend_request).unwrap();
        let (bob, plaintext) =
            DoubleRatchet::decrypt(&bob, &friend_request.message, &rng, &config).unwrap();
        assert_eq!(plaintext, b"Be my friend?");

        let (_bob, reply) = DoubleRatchet::encrypt(&bob, b"Sure!", &config).unwrap();
        let (_alice, plaintext) = DoubleRatchet::decrypt(&alice, &reply, &rng, &config).unwrap();
        assert_eq!(plaintext, b"Sure!");

        // Someone else can't read the friend request.
        let eve_identity_secret = rng.random_secret_key().unwrap();
        let eve =
            build_incoming_friend_request_session(&eve_identity_secret, &friend_request).unwrap();
        assert!(DoubleRatchet::decrypt(&eve, &friend_request.message, &rng, &config).is_err());
    }
}
