// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to key material, storage and host policies the session layer depends on.
use std::fmt::Debug;
use std::hash::Hash as StdHash;

mod key_manager;
mod key_registry;
mod session_reset;
mod session_store;

pub use key_manager::{IdentityManager, PreKeyManager};
pub use key_registry::{IdentityRegistry, PreKeyRegistry};
pub use session_reset::{NoSessionReset, SessionResetHandler, SessionResetStatus};
pub use session_store::SessionStore;

/// Identifier of a remote party, for example their public key or an account name.
pub trait IdentityHandle: Clone + Debug + PartialEq + Eq + StdHash {}

impl<T> IdentityHandle for T where T: Clone + Debug + PartialEq + Eq + StdHash {}
