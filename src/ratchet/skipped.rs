// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::x25519::PublicKey;
use crate::ratchet::{MessageKeys, RatchetError};

/// Cache of message keys for messages which were skipped in a receiving chain, because they
/// arrived out-of-order or got lost.
///
/// The cache never evicts entries silently. Callers pass the capacity and reserve room before
/// inserting; a message which would overflow the cache is rejected instead.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMessageKeys {
    keys: BTreeMap<(PublicKey, u32), MessageKeys>,
}

impl SkippedMessageKeys {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, ratchet_key: &PublicKey, counter: u32) -> bool {
        self.keys.contains_key(&(*ratchet_key, counter))
    }

    /// Checks if `additional` keys still fit into a cache of the given capacity.
    pub fn reserve(&self, additional: usize, capacity: usize) -> Result<(), RatchetError> {
        let required = self.keys.len().saturating_add(additional);
        if required > capacity {
            return Err(RatchetError::TooManySkippedMessages(required, capacity));
        }
        Ok(())
    }

    pub fn insert(
        &mut self,
        ratchet_key: PublicKey,
        message_keys: MessageKeys,
        capacity: usize,
    ) -> Result<(), RatchetError> {
        self.reserve(1, capacity)?;
        self.keys
            .insert((ratchet_key, message_keys.counter()), message_keys);
        Ok(())
    }

    /// Takes the key of a skipped message out of the cache. Keys can only be used once.
    pub fn remove(&mut self, ratchet_key: &PublicKey, counter: u32) -> Option<MessageKeys> {
        self.keys.remove(&(*ratchet_key, counter))
    }
}
