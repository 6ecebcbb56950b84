// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::crypto::x25519::PublicKey;
use crate::key_bundle::PreKeyBundle;

/// Manages public identity keys of other parties.
pub trait IdentityRegistry<ID, Y> {
    type Error: Error;

    fn identity_key(y: &Y, id: &ID) -> Result<Option<PublicKey>, Self::Error>;
}

/// Manages published pre-key bundles of other parties.
pub trait PreKeyRegistry<ID> {
    type State: Clone + Debug + Serialize + for<'a> Deserialize<'a>;

    type Error: Error;

    /// Takes a pre-key bundle of the given party out of the registry.
    fn key_bundle(
        y: Self::State,
        id: &ID,
    ) -> Result<(Self::State, Option<PreKeyBundle>), Self::Error>;
}
