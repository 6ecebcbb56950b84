// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::x25519::PublicKey;
use crate::message::cbor::{decode_cbor, encode_cbor};
use crate::message::{CborError, EncodeError};
use crate::ratchet::RatchetState;

/// All ratchet states we hold for one device of a remote party.
///
/// Next to the current state, states of earlier sessions are kept around ("archived") since
/// messages encrypted with them might still arrive, for example when both parties initiated a
/// session at the same time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<RatchetState>,
    /// Newest first.
    previous: Vec<RatchetState>,
    version: u64,
}

impl SessionRecord {
    pub fn new(state: RatchetState) -> Self {
        Self {
            current: Some(state),
            previous: Vec::new(),
            version: 0,
        }
    }

    pub fn current_state(&self) -> Option<&RatchetState> {
        self.current.as_ref()
    }

    pub fn previous_states(&self) -> &[RatchetState] {
        &self.previous
    }

    pub fn has_current_state(&self) -> bool {
        self.current.is_some()
    }

    /// Identity key of the other party this session was established with.
    pub fn remote_identity_key(&self) -> Option<&PublicKey> {
        self.current
            .as_ref()
            .or_else(|| self.previous.first())
            .map(RatchetState::remote_identity_key)
    }

    /// Incremented every time the record got persisted after a change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn set_current_state(&mut self, state: RatchetState) {
        self.current = Some(state);
    }

    /// Makes the given state the current one, archiving the previous current state.
    pub fn promote_state(&mut self, state: RatchetState, max_archived_states: usize) {
        self.archive_current_state(max_archived_states);
        self.current = Some(state);
    }

    /// Moves the current state into the archive, dropping the oldest archived state when the
    /// archive is full.
    ///
    /// Returns `false` if there was no current state.
    pub fn archive_current_state(&mut self, max_archived_states: usize) -> bool {
        let Some(mut state) = self.current.take() else {
            return false;
        };

        // Archived states never start new sessions.
        state.clear_pending();

        self.previous.insert(0, state);
        self.previous.truncate(max_archived_states);
        true
    }

    /// Makes sure the state with the given base key is the current state, promoting it from the
    /// archive if necessary.
    ///
    /// Returns `false` if no such state exists.
    pub fn promote_matching_state(
        &mut self,
        base_key: &PublicKey,
        max_archived_states: usize,
    ) -> bool {
        if let Some(current) = &self.current {
            if current.base_key() == base_key {
                return true;
            }
        }

        let Some(index) = self
            .previous
            .iter()
            .position(|state| state.base_key() == base_key)
        else {
            return false;
        };

        let state = self.previous.remove(index);
        debug!(%base_key, "promote archived session state");
        self.promote_state(state, max_archived_states);
        true
    }

    /// Replaces an archived state with its updated version and makes it the current state.
    pub(crate) fn promote_previous_state(
        &mut self,
        index: usize,
        state: RatchetState,
        max_archived_states: usize,
    ) {
        self.previous.remove(index);
        debug!(base_key = %state.base_key(), "promote archived session state");
        self.promote_state(state, max_archived_states);
    }

    pub fn remove_previous_states(&mut self) {
        self.previous.clear();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CborError> {
        decode_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::ratchet::RatchetState;
    use crate::test_utils::init_ratchet_pair;

    use super::SessionRecord;

    fn states(rng: &Rng, n: usize) -> Vec<RatchetState> {
        (0..n).map(|_| init_ratchet_pair(rng).0).collect()
    }

    #[test]
    fn archive_and_promote() {
        let rng = Rng::from_seed([1; 32]);
        let states = states(&rng, 3);

        let mut record = SessionRecord::new(states[0].clone());
        record.promote_state(states[1].clone(), 40);
        record.promote_state(states[2].clone(), 40);

        assert_eq!(record.current_state(), Some(&states[2]));
        assert_eq!(record.previous_states().len(), 2);
        assert_eq!(record.previous_states()[0].base_key(), states[1].base_key());

        // Promote the oldest state again.
        assert!(record.promote_matching_state(states[0].base_key(), 40));
        assert_eq!(record.current_state().unwrap().base_key(), states[0].base_key());
        assert_eq!(record.previous_states()[0].base_key(), states[2].base_key());
        assert_eq!(record.previous_states()[1].base_key(), states[1].base_key());

        // Current state matches already.
        assert!(record.promote_matching_state(states[0].base_key(), 40));
        assert_eq!(record.previous_states().len(), 2);

        // Unknown base key.
        let other = init_ratchet_pair(&rng).0;
        assert!(!record.promote_matching_state(other.base_key(), 40));

        record.remove_previous_states();
        assert!(record.previous_states().is_empty());
        assert!(record.has_current_state());
    }

    #[test]
    fn archived_states_are_bounded() {
        let rng = Rng::from_seed([1; 32]);
        let states = states(&rng, 4);

        let mut record = SessionRecord::default();
        assert!(!record.archive_current_state(2));

        for state in &states {
            record.promote_state(state.clone(), 2);
        }
        assert_eq!(record.previous_states().len(), 2);
        assert_eq!(record.previous_states()[0].base_key(), states[2].base_key());
        assert_eq!(record.previous_states()[1].base_key(), states[1].base_key());

        // Pending handshake information is removed from archived states.
        assert!(states[2].pending_prekey().is_some());
        assert!(record.previous_states()[0].pending_prekey().is_none());

        assert!(record.archive_current_state(2));
        assert!(!record.has_current_state());
    }

    #[test]
    fn encode_decode() {
        let rng = Rng::from_seed([1; 32]);
        let mut record = SessionRecord::new(init_ratchet_pair(&rng).0);
        record.promote_state(init_ratchet_pair(&rng).1, 40);
        record.bump_version();

        let bytes = record.to_bytes().unwrap();
        assert_eq!(SessionRecord::from_bytes(&bytes).unwrap(), record);
    }
}
