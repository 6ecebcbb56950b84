// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public key material other parties use to establish a session with us.
#[allow(clippy::module_inception)]
mod key_bundle;
mod prekey;

pub use key_bundle::{KeyBundleError, PreKeyBundle};
pub use prekey::{OneTimePreKey, OneTimePreKeyId, SignedPreKey, SignedPreKeyId};
