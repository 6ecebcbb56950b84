// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::session::{SessionAddress, SessionRecord};

/// Durable storage of session records, keyed by remote identity and device.
///
/// Implementations need to make `store_session` atomic: a record is either fully written or not at
/// all. A crash between decrypting a message and persisting the updated record otherwise leads to
/// message keys being used twice.
pub trait SessionStore<ID> {
    type Error: Error + Send + Sync + 'static;

    fn load_session(&self, address: &SessionAddress<ID>)
    -> Result<Option<SessionRecord>, Self::Error>;

    fn store_session(
        &self,
        address: &SessionAddress<ID>,
        record: &SessionRecord,
    ) -> Result<(), Self::Error>;

    fn delete_session(&self, address: &SessionAddress<ID>) -> Result<(), Self::Error>;
}
