// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise sessions between us and the devices of other parties.
//!
//! A session starts with a handshake ([`builder`]) and continues with the Double Ratchet. All
//! ratchet states of one remote device are kept in a [`SessionRecord`]. [`SessionCipher`] turns
//! records and plaintexts into wire messages and back without any side effects, while
//! [`SessionManager`] takes care of persistence and of serializing access to each session.
pub mod builder;
mod cipher;
mod manager;
mod memory;
mod record;

use serde::{Deserialize, Serialize};

pub use builder::{
    BuilderError, build_incoming_friend_request_session, build_incoming_session,
    build_outgoing_friend_request_session, build_outgoing_session,
};
pub use cipher::{SessionCipher, SessionError};
pub use manager::{DecryptOutcome, SessionManager, SessionManagerError};
pub use memory::{MemorySessionStore, MemoryStoreError};
pub use record::SessionRecord;

/// Identifier of one device of a remote party.
pub type DeviceId = u32;

/// Address of a session: remote party and one of their devices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionAddress<ID> {
    pub id: ID,
    pub device_id: DeviceId,
}

impl<ID> SessionAddress<ID> {
    pub fn new(id: ID, device_id: DeviceId) -> Self {
        Self { id, device_id }
    }
}
