// SPDX-License-Identifier: MIT OR Apache-2.0

use std::marker::PhantomData;

use thiserror::Error;
use tracing::warn;

use crate::config::RatchetConfig;
use crate::crypto::Rng;
use crate::crypto::x25519::SecretKey;
use crate::message::{FriendRequestMessage, PreKeyMessage, RatchetMessage, WireMessage};
use crate::ratchet::{DoubleRatchet, RatchetError};
use crate::session::SessionRecord;
use crate::session::builder::{
    BuilderError, build_incoming_friend_request_session, build_incoming_session,
};
use crate::traits::{IdentityManager, PreKeyManager};

/// Encrypts and decrypts messages of one session record.
///
/// Records are never changed in place. All methods return an updated copy which should be
/// persisted before the plaintext or ciphertext is handed over to the application.
pub struct SessionCipher<KMG> {
    _marker: PhantomData<KMG>,
}

impl<KMG> SessionCipher<KMG>
where
    KMG: IdentityManager<KMG::State> + PreKeyManager,
{
    /// Encrypts a message with the current state of the record.
    ///
    /// As long as the other party hasn't answered yet, the message is wrapped in a pre-key or
    /// friend-request message so they can establish the session on their end.
    pub fn encrypt(
        record: &SessionRecord,
        plaintext: &[u8],
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, WireMessage), SessionError> {
        let current = record.current_state().ok_or(SessionError::NoSession)?;
        let (state, message) = DoubleRatchet::encrypt(current, plaintext, config)?;

        let message = if let Some(pending) = state.pending_prekey() {
            WireMessage::PreKey(PreKeyMessage {
                identity_key: *state.local_identity_key(),
                base_key: pending.base_key,
                signed_prekey_id: pending.signed_prekey_id,
                onetime_prekey_id: pending.onetime_prekey_id,
                message,
            })
        } else if let Some(pending) = state.pending_friend_request() {
            WireMessage::FriendRequest(FriendRequestMessage {
                identity_key: *state.local_identity_key(),
                base_key: pending.base_key,
                message,
            })
        } else {
            WireMessage::Ratchet(message)
        };

        let mut record_i = record.clone();
        record_i.set_current_state(state);

        Ok((record_i, message))
    }

    /// Decrypts any message variant.
    ///
    /// Only pre-key messages change the key manager state, as they might consume a one-time
    /// pre-key.
    pub fn decrypt(
        record: &SessionRecord,
        y_manager: KMG::State,
        message: &WireMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, KMG::State, Vec<u8>), SessionError> {
        match message {
            WireMessage::Ratchet(message) => {
                let (record_i, plaintext) = Self::decrypt_ratchet(record, message, rng, config)?;
                Ok((record_i, y_manager, plaintext))
            }
            WireMessage::PreKey(message) => {
                Self::decrypt_prekey(record, y_manager, message, rng, config)
            }
            WireMessage::FriendRequest(message) => {
                let (record_i, plaintext) = Self::decrypt_friend_request(
                    record,
                    KMG::identity_secret(&y_manager),
                    message,
                    rng,
                    config,
                )?;
                Ok((record_i, y_manager, plaintext))
            }
        }
    }

    /// Decrypts a regular message, trying the current state first and then all archived states.
    ///
    /// An archived state which could decrypt the message becomes the current state again.
    pub fn decrypt_ratchet(
        record: &SessionRecord,
        message: &RatchetMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, Vec<u8>), SessionError> {
        let mut current_error = None;

        if let Some(current) = record.current_state() {
            match DoubleRatchet::decrypt(current, message, rng, config) {
                Ok((mut state, plaintext)) => {
                    state.clear_pending();
                    let mut record_i = record.clone();
                    record_i.set_current_state(state);
                    return Ok((record_i, plaintext));
                }
                Err(err) => current_error = Some(err),
            }
        }

        for (index, previous) in record.previous_states().iter().enumerate() {
            if let Ok((mut state, plaintext)) = DoubleRatchet::decrypt(previous, message, rng, config)
            {
                state.clear_pending();
                let mut record_i = record.clone();
                record_i.promote_previous_state(index, state, config.max_archived_states);
                return Ok((record_i, plaintext));
            }
        }

        let err = match current_error {
            Some(err) => SessionError::Ratchet(err),
            None => SessionError::NoSession,
        };
        warn!(
            ratchet_key = %message.ratchet_key,
            counter = message.counter,
            "rejected message: {err}"
        );
        Err(err)
    }

    /// Decrypts a pre-key message, establishing a new session if we don't know it yet.
    ///
    /// Repeated pre-key messages of the same session (the initiator sends them until we answer)
    /// are matched by their base key and don't consume further pre-keys.
    pub fn decrypt_prekey(
        record: &SessionRecord,
        y_manager: KMG::State,
        message: &PreKeyMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, KMG::State, Vec<u8>), SessionError> {
        let mut record_i = record.clone();

        let result = if record_i.promote_matching_state(&message.base_key, config.max_archived_states)
        {
            Self::decrypt_current(record_i, &message.message, rng, config)
                .map(|(record_ii, plaintext)| (record_ii, y_manager, plaintext))
        } else {
            build_incoming_session::<KMG>(y_manager, message)
                .map_err(SessionError::from)
                .and_then(|(y_manager_i, state)| {
                    let (state, plaintext) =
                        DoubleRatchet::decrypt(&state, &message.message, rng, config)?;
                    record_i.promote_state(state, config.max_archived_states);
                    Ok((record_i, y_manager_i, plaintext))
                })
        };

        result.inspect_err(|err| {
            warn!(
                base_key = %message.base_key,
                counter = message.message.counter,
                "rejected pre-key message: {err}"
            )
        })
    }

    /// Decrypts a friend-request message, establishing a new session if we don't know it yet.
    pub fn decrypt_friend_request(
        record: &SessionRecord,
        our_identity_secret: &SecretKey,
        message: &FriendRequestMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, Vec<u8>), SessionError> {
        let mut record_i = record.clone();

        let result = if record_i.promote_matching_state(&message.base_key, config.max_archived_states)
        {
            Self::decrypt_current(record_i, &message.message, rng, config)
        } else {
            build_incoming_friend_request_session(our_identity_secret, message)
                .map_err(SessionError::from)
                .and_then(|state| {
                    let (state, plaintext) =
                        DoubleRatchet::decrypt(&state, &message.message, rng, config)?;
                    record_i.promote_state(state, config.max_archived_states);
                    Ok((record_i, plaintext))
                })
        };

        result.inspect_err(|err| {
            warn!(
                base_key = %message.base_key,
                counter = message.message.counter,
                "rejected friend request: {err}"
            )
        })
    }

    fn decrypt_current(
        mut record: SessionRecord,
        message: &RatchetMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(SessionRecord, Vec<u8>), SessionError> {
        let current = record.current_state().ok_or(SessionError::NoSession)?;
        let (mut state, plaintext) = DoubleRatchet::decrypt(current, message, rng, config)?;
        state.clear_pending();
        record.set_current_state(state);
        Ok((record, plaintext))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error("no session established yet")]
    NoSession,
}
