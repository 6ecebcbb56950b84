// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-ratchet` provides forward-secure, end-to-end encrypted messaging between two parties.
//!
//! A session between us and one device of another party is established asynchronously with an
//! X3DH-style handshake against a pre-key bundle the other party published before. From then on
//! every message is encrypted with its own key, derived by a [Double
//! Ratchet](https://signal.org/docs/specifications/doubleratchet/). Keys of past messages can not
//! be recovered from the current state (forward secrecy) and fresh Diffie-Hellman key agreements
//! heal the session after a compromise (post-compromise security).
//!
//! Messages may arrive late, out of order or not at all. Keys of skipped messages are cached up to
//! a configurable bound, duplicates and replays are rejected.
//!
//! ## Layers
//!
//! The crate can be used on different levels, depending on how much control an application needs:
//!
//! * [`ratchet::DoubleRatchet`] encrypts and decrypts with a single ratchet state.
//! * [`session::builder`] establishes ratchet states from pre-key bundles or identity keys.
//! * [`session::SessionCipher`] works on [`session::SessionRecord`]s, holding the current and all
//!   archived states of one session, and emits the right [`message::WireMessage`] variant.
//! * [`session::SessionManager`] adds persistence through a [`traits::SessionStore`], session
//!   resets and serialized access to every session from multiple threads.
//!
//! All functions on the lower layers are free of side effects: they take a state and return an
//! updated copy. Nothing changes when an operation fails.
//!
//! ## Key material
//!
//! Our own identity secret, signed pre-keys and one-time pre-keys are held by the [`KeyManager`],
//! pre-key bundles of others we've collected by the [`KeyRegistry`]. Both are plain serializable
//! states and can be persisted by the application.
//!
//! ## Example
//!
//! ```
//! use p2panda_ratchet::session::{MemorySessionStore, SessionAddress, SessionManager};
//! use p2panda_ratchet::traits::NoSessionReset;
//! use p2panda_ratchet::{KeyManager, KeyRegistry, RatchetConfig, Rng};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let init = |rng: Rng| -> Result<_, Box<dyn std::error::Error>> {
//!     let identity_secret = rng.random_secret_key()?;
//!     let keys = KeyManager::init(&identity_secret, &rng)?;
//!     Ok(SessionManager::new(
//!         MemorySessionStore::<String>::new(),
//!         keys,
//!         KeyRegistry::init(),
//!         NoSessionReset,
//!         rng,
//!         RatchetConfig::default(),
//!     )?)
//! };
//!
//! let alice = init(Rng::default())?;
//! let bob = init(Rng::default())?;
//! let to_alice = SessionAddress::new("alice".to_string(), 1);
//! let to_bob = SessionAddress::new("bob".to_string(), 1);
//!
//! // Bob publishes a pre-key bundle which Alice picks up.
//! alice.add_prekey_bundle("bob".to_string(), bob.generate_onetime_bundle()?)?;
//! alice.init_outgoing_session(&to_bob)?;
//!
//! let message = alice.encrypt(&to_bob, b"Hello, Bob!")?;
//! let outcome = bob.decrypt(&to_alice, &message)?;
//! assert_eq!(outcome.plaintext, b"Hello, Bob!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! The first messages of a session are protected by the pre-keys used in the handshake. Without a
//! one-time pre-key their forward secrecy depends on how often the signed pre-key gets rotated.
//! Sessions bootstrapped from an identity key alone ("friend requests") require the identity key
//! to be trusted out-of-band.
//!
//! Message headers (ratchet public key and counters) are sent in plaintext but are authenticated.
//! The identity keys of both parties are bound to every message as associated data.
pub mod config;
pub mod crypto;
pub mod key_bundle;
mod key_manager;
mod key_registry;
pub mod message;
pub mod ratchet;
pub mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use config::{ConfigError, RatchetConfig};
pub use crypto::{Rng, RngError};
pub use key_bundle::{OneTimePreKeyId, PreKeyBundle, SignedPreKeyId};
pub use key_manager::{KeyManager, KeyManagerError, KeyManagerState};
pub use key_registry::{KeyRegistry, KeyRegistryError, KeyRegistryState};
pub use message::{DecodeError, EncodeError, WireMessage};
pub use ratchet::{DoubleRatchet, RatchetError, RatchetState};
pub use session::{
    DecryptOutcome, SessionAddress, SessionError, SessionManager, SessionManagerError,
    SessionRecord,
};
