// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives used by the ratchet and the session handshake.
//!
//! Following algorithms are used:
//! * ChaCha random number generator with 20 rounds
//! * XChaCha20-Poly1305 AEAD with detached tag
//! * HKDF with SHA256
//! * ECDH key agreement with X25519
//! * XEdDSA signatures over X25519 keys (Ed25519 compatible, SHA-512)
pub mod aead;
pub mod hkdf;
mod rng;
mod secret;
pub mod x25519;
pub mod xeddsa;

pub use rng::{Rng, RngError};
pub use secret::Secret;
