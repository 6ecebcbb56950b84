// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers to set up key material and sessions in tests.
use crate::config::RatchetConfig;
use crate::crypto::Rng;
use crate::crypto::x25519::SecretKey;
use crate::key_manager::{KeyManager, KeyManagerState};
use crate::message::PreKeyMessage;
use crate::ratchet::{DoubleRatchet, RatchetState};
use crate::session::{build_incoming_session, build_outgoing_session};
use crate::traits::PreKeyManager;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Returns a fresh identity secret and key manager state with one one-time pre-key.
pub fn init_identity(rng: &Rng) -> (SecretKey, KeyManagerState) {
    let identity_secret = rng.random_secret_key().unwrap();
    let y_manager = KeyManager::init(&identity_secret, rng).unwrap();
    let (y_manager, _) = KeyManager::generate_onetime_bundle(y_manager, rng).unwrap();
    (identity_secret, y_manager)
}

/// Returns the ratchet states of an initiator and a responder right after the handshake.
///
/// The initiator did not send a message yet and still carries pending pre-key information.
pub fn init_ratchet_pair(rng: &Rng) -> (RatchetState, RatchetState) {
    let alice_identity_secret = rng.random_secret_key().unwrap();

    let bob_identity_secret = rng.random_secret_key().unwrap();
    let bob_manager = KeyManager::init(&bob_identity_secret, rng).unwrap();
    let (bob_manager, bob_bundle) = KeyManager::generate_onetime_bundle(bob_manager, rng).unwrap();

    let alice = build_outgoing_session(&alice_identity_secret, &bob_bundle, rng).unwrap();

    // Bob only needs the handshake fields of the pre-key message.
    let (_, message) =
        DoubleRatchet::encrypt(&alice, b"", &RatchetConfig::default()).unwrap();
    let pending = alice.pending_prekey().unwrap();
    let prekey_message = PreKeyMessage {
        identity_key: *alice.local_identity_key(),
        base_key: pending.base_key,
        signed_prekey_id: pending.signed_prekey_id,
        onetime_prekey_id: pending.onetime_prekey_id,
        message,
    };

    let (_, bob) = build_incoming_session::<KeyManager>(bob_manager, &prekey_message).unwrap();

    (alice, bob)
}
