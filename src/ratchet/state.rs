// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::Rng;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::key_bundle::{OneTimePreKeyId, SignedPreKeyId};
use crate::ratchet::{ChainKey, RatchetError, RootKey, SkippedMessageKeys};

/// State of one side of a Double Ratchet session.
///
/// The state is never changed in place by the ratchet. Every operation returns a new state which
/// should replace the old one after it was persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetState {
    pub(crate) root_key: RootKey,
    pub(crate) sending_chain: SendingChain,
    /// Newest chain last.
    pub(crate) receiving_chains: Vec<ReceivingChain>,
    pub(crate) skipped_message_keys: SkippedMessageKeys,
    pub(crate) previous_counter: u32,
    pub(crate) local_identity_key: PublicKey,
    pub(crate) remote_identity_key: PublicKey,
    pub(crate) base_key: PublicKey,
    pub(crate) pending_prekey: Option<PendingPreKey>,
    pub(crate) pending_friend_request: Option<PendingFriendRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingChain {
    pub(crate) ratchet_secret: SecretKey,
    pub(crate) ratchet_key: PublicKey,
    pub(crate) chain_key: ChainKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingChain {
    pub(crate) ratchet_key: PublicKey,
    pub(crate) chain_key: ChainKey,
}

/// Pre-key information the initiator attaches to all messages until the other party answered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub signed_prekey_id: SignedPreKeyId,
    pub onetime_prekey_id: Option<OneTimePreKeyId>,
    pub base_key: PublicKey,
}

/// Same as [`PendingPreKey`] for sessions which were established with a friend request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFriendRequest {
    pub base_key: PublicKey,
}

/// Keys identifying both parties and the session itself.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SessionKeys {
    pub local_identity_key: PublicKey,
    pub remote_identity_key: PublicKey,
    pub base_key: PublicKey,
}

impl RatchetState {
    /// State of the party who initiated the session.
    ///
    /// The chain derived from the handshake becomes the receiving chain for the responder's initial
    /// ratchet key. A Diffie-Hellman ratchet step with a fresh key pair yields our first sending
    /// chain.
    pub(crate) fn init_initiator(
        root_key: RootKey,
        chain_key: ChainKey,
        their_ratchet_key: PublicKey,
        keys: SessionKeys,
        rng: &Rng,
    ) -> Result<Self, RatchetError> {
        let ratchet_secret = rng.random_secret_key()?;
        let (root_key, sending_chain_key) =
            root_key.create_chain(&their_ratchet_key, &ratchet_secret)?;

        Ok(Self {
            root_key,
            sending_chain: SendingChain {
                ratchet_key: ratchet_secret.public_key()?,
                ratchet_secret,
                chain_key: sending_chain_key,
            },
            receiving_chains: vec![ReceivingChain {
                ratchet_key: their_ratchet_key,
                chain_key,
            }],
            skipped_message_keys: SkippedMessageKeys::default(),
            previous_counter: 0,
            local_identity_key: keys.local_identity_key,
            remote_identity_key: keys.remote_identity_key,
            base_key: keys.base_key,
            pending_prekey: None,
            pending_friend_request: None,
        })
    }

    /// State of the party who received the first message.
    ///
    /// Our initial ratchet key pair is the one the initiator already knows from the handshake.
    pub(crate) fn init_responder(
        root_key: RootKey,
        chain_key: ChainKey,
        our_ratchet_secret: SecretKey,
        keys: SessionKeys,
    ) -> Result<Self, RatchetError> {
        Ok(Self {
            root_key,
            sending_chain: SendingChain {
                ratchet_key: our_ratchet_secret.public_key()?,
                ratchet_secret: our_ratchet_secret,
                chain_key,
            },
            receiving_chains: Vec::new(),
            skipped_message_keys: SkippedMessageKeys::default(),
            previous_counter: 0,
            local_identity_key: keys.local_identity_key,
            remote_identity_key: keys.remote_identity_key,
            base_key: keys.base_key,
            pending_prekey: None,
            pending_friend_request: None,
        })
    }

    pub fn local_identity_key(&self) -> &PublicKey {
        &self.local_identity_key
    }

    pub fn remote_identity_key(&self) -> &PublicKey {
        &self.remote_identity_key
    }

    /// Base key of the initiator, identifying this session.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// Counter of the next message we send.
    pub fn sending_counter(&self) -> u32 {
        self.sending_chain.chain_key.index()
    }

    /// Our current ratchet public key.
    pub fn sending_ratchet_key(&self) -> &PublicKey {
        &self.sending_chain.ratchet_key
    }

    /// Counter of the next expected message in the newest receiving chain.
    pub fn receiving_counter(&self) -> Option<u32> {
        self.receiving_chains
            .last()
            .map(|chain| chain.chain_key.index())
    }

    pub fn receiving_chains_len(&self) -> usize {
        self.receiving_chains.len()
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn skipped_message_keys(&self) -> &SkippedMessageKeys {
        &self.skipped_message_keys
    }

    pub fn pending_prekey(&self) -> Option<&PendingPreKey> {
        self.pending_prekey.as_ref()
    }

    pub fn pending_friend_request(&self) -> Option<&PendingFriendRequest> {
        self.pending_friend_request.as_ref()
    }

    /// Forgets pending handshake information as soon as the other party answered us.
    pub(crate) fn clear_pending(&mut self) {
        self.pending_prekey = None;
        self.pending_friend_request = None;
    }

    pub(crate) fn receiving_chain_position(&self, ratchet_key: &PublicKey) -> Option<usize> {
        self.receiving_chains
            .iter()
            .position(|chain| &chain.ratchet_key == ratchet_key)
    }
}
