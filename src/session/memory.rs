// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for session records.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::session::{SessionAddress, SessionRecord};
use crate::traits::{IdentityHandle, SessionStore};

/// An in-memory store for session records.
///
/// `MemorySessionStore` can be shared across threads, clones point at the same records.
#[derive(Clone, Debug)]
pub struct MemorySessionStore<ID> {
    inner: Arc<RwLock<HashMap<SessionAddress<ID>, SessionRecord>>>,
}

impl<ID> MemorySessionStore<ID> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<ID> Default for MemorySessionStore<ID> {
    fn default() -> Self {
        Self::new()
    }
}

impl<ID> SessionStore<ID> for MemorySessionStore<ID>
where
    ID: IdentityHandle,
{
    type Error = MemoryStoreError;

    fn load_session(
        &self,
        address: &SessionAddress<ID>,
    ) -> Result<Option<SessionRecord>, Self::Error> {
        let records = self
            .inner
            .read()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        Ok(records.get(address).cloned())
    }

    fn store_session(
        &self,
        address: &SessionAddress<ID>,
        record: &SessionRecord,
    ) -> Result<(), Self::Error> {
        let mut records = self
            .inner
            .write()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        records.insert(address.clone(), record.clone());
        Ok(())
    }

    fn delete_session(&self, address: &SessionAddress<ID>) -> Result<(), Self::Error> {
        let mut records = self
            .inner
            .write()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        records.remove(address);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("session store lock is poisoned")]
    LockPoisoned,
}
