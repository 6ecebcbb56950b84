// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::RatchetConfig;
use crate::crypto::aead::{AeadError, aead_decrypt, aead_encrypt};
use crate::crypto::hkdf::HkdfError;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey, X25519Error};
use crate::crypto::{Rng, RngError};
use crate::message::{HEADER_SIZE, RatchetMessage, header_bytes};
use crate::ratchet::{MessageKeys, RatchetState, ReceivingChain, SendingChain, SkippedMessageKeys};

/// Size of the associated data authenticated with every message.
const AD_SIZE: usize = PUBLIC_KEY_SIZE * 2 + HEADER_SIZE;

/// Double Ratchet with support for out-of-order and lost messages.
///
/// Both operations take the current state by reference and return the next state on success. A
/// failed decryption, for example because the message was tampered with, leaves the caller with
/// the unchanged previous state.
///
/// Messages can arrive out-of-order. Keys of skipped messages are cached in the state until the
/// message arrives, bounded by the limits of [`RatchetConfig`]:
///
/// ```text
/// receiving chain
///
/// 0
/// 1 <- Current chain "height"
/// 2 <- Cached
/// 3 <- Cached
/// 4 <- Message 4 arrives, new chain "height" is 5
/// ```
pub struct DoubleRatchet;

impl DoubleRatchet {
    /// Encrypts a message with the next key of our sending chain.
    pub fn encrypt(
        y: &RatchetState,
        plaintext: &[u8],
        config: &RatchetConfig,
    ) -> Result<(RatchetState, RatchetMessage), RatchetError> {
        if plaintext.len() > config.max_message_size {
            return Err(RatchetError::MessageTooLarge(
                plaintext.len(),
                config.max_message_size,
            ));
        }

        let mut y_i = y.clone();

        let message_keys = y_i.sending_chain.chain_key.message_keys()?;
        let ratchet_key = y_i.sending_chain.ratchet_key;
        let previous_counter = y_i.previous_counter;

        let aad = associated_data(
            &y_i.local_identity_key,
            &y_i.remote_identity_key,
            &header_bytes(&ratchet_key, message_keys.counter(), previous_counter),
        );
        let (ciphertext, tag) = aead_encrypt(
            message_keys.key(),
            plaintext,
            message_keys.nonce(),
            Some(&aad),
        )?;

        y_i.sending_chain.chain_key = y_i.sending_chain.chain_key.next()?;

        Ok((
            y_i,
            RatchetMessage {
                ratchet_key,
                counter: message_keys.counter(),
                previous_counter,
                ciphertext,
                tag,
            },
        ))
    }

    /// Decrypts a message of the other party.
    ///
    /// A message with a ratchet key we haven't seen yet triggers a Diffie-Hellman ratchet step,
    /// which requires a fresh key pair from the random number generator.
    pub fn decrypt(
        y: &RatchetState,
        message: &RatchetMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<(RatchetState, Vec<u8>), RatchetError> {
        let mut y_i = y.clone();

        // Cached keys outlive their receiving chain, which might have been dropped already.
        let (y_iii, message_keys) = match y_i
            .skipped_message_keys
            .remove(&message.ratchet_key, message.counter)
        {
            Some(message_keys) => (y_i, message_keys),
            None => {
                let (y_ii, position) = match y_i.receiving_chain_position(&message.ratchet_key) {
                    Some(position) => (y_i, position),
                    None => {
                        let y_ii = Self::ratchet_step(y_i, message, rng, config)?;
                        let position = y_ii.receiving_chains.len() - 1;
                        (y_ii, position)
                    }
                };
                Self::message_keys(y_ii, position, message, config)?
            }
        };

        let aad = associated_data(
            &y_iii.remote_identity_key,
            &y_iii.local_identity_key,
            &message.header_bytes(),
        );
        let plaintext = aead_decrypt(
            message_keys.key(),
            &message.ciphertext,
            &message.tag,
            message_keys.nonce(),
            Some(&aad),
        )
        .map_err(|_| RatchetError::AuthenticationFailed)?;

        Ok((y_iii, plaintext))
    }

    /// Starts a new receiving chain for the other party's new ratchet key and a new sending chain
    /// with a fresh ratchet key pair of ours.
    fn ratchet_step(
        mut y: RatchetState,
        message: &RatchetMessage,
        rng: &Rng,
        config: &RatchetConfig,
    ) -> Result<RatchetState, RatchetError> {
        // Keep keys of messages the other party sent in their previous chain which didn't arrive
        // yet.
        if let Some(chain) = y.receiving_chains.last_mut() {
            skip_message_keys(
                &mut y.skipped_message_keys,
                chain,
                message.previous_counter,
                config,
            )?;
        }

        // A key agreement failing with the sender's ratchet key means the header was forged.
        let (root_key, receiving_chain_key) = y
            .root_key
            .create_chain(&message.ratchet_key, &y.sending_chain.ratchet_secret)
            .map_err(|err| match err {
                RatchetError::X25519(_) => RatchetError::AuthenticationFailed,
                err => err,
            })?;

        let ratchet_secret = rng.random_secret_key()?;
        let (root_key, sending_chain_key) =
            root_key.create_chain(&message.ratchet_key, &ratchet_secret)?;

        y.root_key = root_key;
        y.previous_counter = y.sending_chain.chain_key.index();
        y.sending_chain = SendingChain {
            ratchet_key: ratchet_secret.public_key()?,
            ratchet_secret,
            chain_key: sending_chain_key,
        };

        y.receiving_chains.push(ReceivingChain {
            ratchet_key: message.ratchet_key,
            chain_key: receiving_chain_key,
        });
        let max_receiving_chains = config.max_receiving_chains.max(1);
        if y.receiving_chains.len() > max_receiving_chains {
            let excess = y.receiving_chains.len() - max_receiving_chains;
            y.receiving_chains.drain(..excess);
        }

        debug!(
            their_ratchet_key = %message.ratchet_key,
            our_ratchet_key = %y.sending_chain.ratchet_key,
            previous_counter = y.previous_counter,
            "diffie-hellman ratchet step"
        );

        Ok(y)
    }

    /// Returns the key for the given message by moving the receiving chain forward.
    fn message_keys(
        mut y: RatchetState,
        position: usize,
        message: &RatchetMessage,
        config: &RatchetConfig,
    ) -> Result<(RatchetState, MessageKeys), RatchetError> {
        let chain = &mut y.receiving_chains[position];

        // Message "from the past" without a cached key, it was either delivered already or its
        // key got dropped.
        if message.counter < chain.chain_key.index() {
            return Err(RatchetError::DuplicateOrUnknownMessage(
                message.ratchet_key,
                message.counter,
            ));
        }

        skip_message_keys(
            &mut y.skipped_message_keys,
            chain,
            message.counter,
            config,
        )?;

        let message_keys = chain.chain_key.message_keys()?;
        chain.chain_key = chain.chain_key.next()?;

        Ok((y, message_keys))
    }
}

/// Moves the receiving chain forward until `counter`, caching the keys of all messages in-between.
fn skip_message_keys(
    skipped: &mut SkippedMessageKeys,
    chain: &mut ReceivingChain,
    counter: u32,
    config: &RatchetConfig,
) -> Result<(), RatchetError> {
    let index = chain.chain_key.index();
    if counter <= index {
        return Ok(());
    }

    let jump = counter - index;
    if jump > config.max_forward_jump {
        return Err(RatchetError::TooManySkippedMessages(
            jump as usize,
            config.max_forward_jump as usize,
        ));
    }
    skipped.reserve(jump as usize, config.max_skipped_message_keys)?;

    while chain.chain_key.index() < counter {
        let message_keys = chain.chain_key.message_keys()?;
        trace!(
            ratchet_key = %chain.ratchet_key,
            counter = message_keys.counter(),
            "cache skipped message key"
        );
        skipped.insert(
            chain.ratchet_key,
            message_keys,
            config.max_skipped_message_keys,
        )?;
        chain.chain_key = chain.chain_key.next()?;
    }

    Ok(())
}

/// Associated data binds every message to the identities of sender and receiver and to its
/// header.
fn associated_data(
    sender_identity_key: &PublicKey,
    receiver_identity_key: &PublicKey,
    header: &[u8; HEADER_SIZE],
) -> [u8; AD_SIZE] {
    let mut aad = [0u8; AD_SIZE];
    aad[..PUBLIC_KEY_SIZE].copy_from_slice(sender_identity_key.as_bytes());
    aad[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE * 2].copy_from_slice(receiver_identity_key.as_bytes());
    aad[PUBLIC_KEY_SIZE * 2..].copy_from_slice(header);
    aad
}

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error("message could not be authenticated")]
    AuthenticationFailed,

    #[error("message {1} of chain {0} was already received or its key is unknown")]
    DuplicateOrUnknownMessage(PublicKey, u32),

    #[error("message requires {0} skipped message keys, maximum is {1}")]
    TooManySkippedMessages(usize, usize),

    #[error("plaintext of {0} bytes exceeds maximum size of {1} bytes")]
    MessageTooLarge(usize, usize),

    #[error("sending chain reached its maximum length")]
    ChainExhausted,
}

#[cfg(test)]
mod tests {
    use crate::config::RatchetConfig;
    use crate::crypto::Rng;
    use crate::ratchet::{ChainKey, RatchetState, RootKey, SessionKeys};

    use super::{DoubleRatchet, RatchetError};

    /// Returns ratchet states of initiator "alice" and responder "bob" sharing the same secret.
    fn init_pair(rng: &Rng) -> (RatchetState, RatchetState) {
        let alice_identity_key = rng.random_secret_key().unwrap().public_key().unwrap();
        let bob_identity_key = rng.random_secret_key().unwrap().public_key().unwrap();
        let base_key = rng.random_secret_key().unwrap().public_key().unwrap();

        let root_key: [u8; 32] = rng.random_array().unwrap();
        let chain_key: [u8; 32] = rng.random_array().unwrap();
        let bob_ratchet_secret = rng.random_secret_key().unwrap();

        let alice = RatchetState::init_initiator(
            RootKey::from_bytes(root_key),
            ChainKey::new(chain_key, 0),
            bob_ratchet_secret.public_key().unwrap(),
            SessionKeys {
                local_identity_key: alice_identity_key,
                remote_identity_key: bob_identity_key,
                base_key,
            },
            rng,
        )
        .unwrap();

        let bob = RatchetState::init_responder(
            RootKey::from_bytes(root_key),
            ChainKey::new(chain_key, 0),
            bob_ratchet_secret,
            SessionKeys {
                local_identity_key: bob_identity_key,
                remote_identity_key: alice_identity_key,
                base_key,
            },
        )
        .unwrap();

        (alice, bob)
    }

    #[test]
    fn encrypt_decrypt() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (alice, message_1) = DoubleRatchet::encrypt(&alice, b"Hello, Bob!", &config).unwrap();
        let (alice, message_2) = DoubleRatchet::encrypt(&alice, b"Are you there?", &config).unwrap();
        assert_eq!(message_1.counter, 0);
        assert_eq!(message_2.counter, 1);
        assert_eq!(alice.sending_counter(), 2);

        let (bob, receive_1) = DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).unwrap();
        let (bob, receive_2) = DoubleRatchet::decrypt(&bob, &message_2, &rng, &config).unwrap();
        assert_eq!(receive_1, b"Hello, Bob!");
        assert_eq!(receive_2, b"Are you there?");
        assert_eq!(bob.receiving_counter(), Some(alice.sending_counter()));

        // Bob answers with a new ratchet key after the ratchet step.
        let (bob, message_3) = DoubleRatchet::encrypt(&bob, b"Yes!", &config).unwrap();
        assert_eq!(&message_3.ratchet_key, bob.sending_ratchet_key());
        assert_ne!(message_3.ratchet_key, message_1.ratchet_key);
        assert_eq!(message_3.counter, 0);

        let (alice, receive_3) = DoubleRatchet::decrypt(&alice, &message_3, &rng, &config).unwrap();
        assert_eq!(receive_3, b"Yes!");

        // Alice performed a ratchet step as well and tells Bob how long her previous chain was.
        let (_alice, message_4) = DoubleRatchet::encrypt(&alice, b"Great", &config).unwrap();
        assert_eq!(message_4.previous_counter, 2);
        assert_eq!(message_4.counter, 0);
        assert_ne!(message_4.ratchet_key, message_1.ratchet_key);

        let (bob, receive_4) = DoubleRatchet::decrypt(&bob, &message_4, &rng, &config).unwrap();
        assert_eq!(receive_4, b"Great");
        assert!(bob.skipped_message_keys().is_empty());
    }

    #[test]
    fn responder_sends_first() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (bob, message_1) = DoubleRatchet::encrypt(&bob, b"Hi Alice", &config).unwrap();
        let (alice, receive_1) = DoubleRatchet::decrypt(&alice, &message_1, &rng, &config).unwrap();
        assert_eq!(receive_1, b"Hi Alice");

        let (_alice, message_2) = DoubleRatchet::encrypt(&alice, b"Hi Bob", &config).unwrap();
        let (_bob, receive_2) = DoubleRatchet::decrypt(&bob, &message_2, &rng, &config).unwrap();
        assert_eq!(receive_2, b"Hi Bob");
    }

    #[test]
    fn out_of_order() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (mut alice, mut bob) = init_pair(&rng);

        let mut messages = Vec::new();
        for i in 0..5u8 {
            let (alice_i, message) = DoubleRatchet::encrypt(&alice, &[i], &config).unwrap();
            alice = alice_i;
            messages.push(message);
        }

        for (i, message) in messages.iter().enumerate().rev() {
            let (bob_i, plaintext) = DoubleRatchet::decrypt(&bob, message, &rng, &config).unwrap();
            assert_eq!(plaintext, vec![i as u8]);
            bob = bob_i;
        }

        assert!(bob.skipped_message_keys().is_empty());
        assert_eq!(bob.receiving_counter(), Some(5));
    }

    #[test]
    fn late_message_from_previous_chain() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (alice, message_1) = DoubleRatchet::encrypt(&alice, b"one", &config).unwrap();
        let (alice, message_2) = DoubleRatchet::encrypt(&alice, b"two", &config).unwrap();
        let (bob, _) = DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).unwrap();

        let (bob, message_3) = DoubleRatchet::encrypt(&bob, b"three", &config).unwrap();
        let (alice, _) = DoubleRatchet::decrypt(&alice, &message_3, &rng, &config).unwrap();
        let (_alice, message_4) = DoubleRatchet::encrypt(&alice, b"four", &config).unwrap();

        // Message of the new chain arrives before the last message of the previous chain.
        let (bob, receive_4) = DoubleRatchet::decrypt(&bob, &message_4, &rng, &config).unwrap();
        assert_eq!(receive_4, b"four");
        assert_eq!(bob.skipped_message_keys().len(), 1);

        let (bob, receive_2) = DoubleRatchet::decrypt(&bob, &message_2, &rng, &config).unwrap();
        assert_eq!(receive_2, b"two");
        assert!(bob.skipped_message_keys().is_empty());
        assert_eq!(bob.receiving_chains_len(), 2);
    }

    #[test]
    fn late_message_after_dropped_chain() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (alice, message_1) = DoubleRatchet::encrypt(&alice, b"late", &config).unwrap();
        let (mut alice, message_2) = DoubleRatchet::encrypt(&alice, b"early", &config).unwrap();
        let (mut bob, _) = DoubleRatchet::decrypt(&bob, &message_2, &rng, &config).unwrap();
        assert_eq!(bob.skipped_message_keys().len(), 1);

        // More ratchet steps than receiving chains are kept.
        for _ in 0..config.max_receiving_chains + 1 {
            let (bob_i, message) = DoubleRatchet::encrypt(&bob, b"pong", &config).unwrap();
            let (alice_i, _) = DoubleRatchet::decrypt(&alice, &message, &rng, &config).unwrap();
            let (alice_i, message) = DoubleRatchet::encrypt(&alice_i, b"ping", &config).unwrap();
            let (bob_i, _) = DoubleRatchet::decrypt(&bob_i, &message, &rng, &config).unwrap();
            alice = alice_i;
            bob = bob_i;
        }
        assert_eq!(bob.receiving_chains_len(), config.max_receiving_chains);
        assert_eq!(bob.skipped_message_keys().len(), 1);

        let (bob, plaintext) = DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).unwrap();
        assert_eq!(plaintext, b"late");
        assert!(bob.skipped_message_keys().is_empty());

        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &message_1, &rng, &config),
            Err(RatchetError::AuthenticationFailed)
        ));
    }

    #[test]
    fn replay() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (_alice, message) = DoubleRatchet::encrypt(&alice, b"once", &config).unwrap();
        let (bob, _) = DoubleRatchet::decrypt(&bob, &message, &rng, &config).unwrap();

        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &message, &rng, &config),
            Err(RatchetError::DuplicateOrUnknownMessage(_, 0))
        ));
    }

    #[test]
    fn tampered_messages() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (alice, message_1) = DoubleRatchet::encrypt(&alice, b"first", &config).unwrap();
        let (bob, _) = DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).unwrap();
        let (_alice, message_2) = DoubleRatchet::encrypt(&alice, b"second", &config).unwrap();

        let mut tampered = Vec::new();

        let mut message = message_2.clone();
        message.ciphertext[0] ^= 1;
        tampered.push(message);

        let mut message = message_2.clone();
        message.tag[15] ^= 1;
        tampered.push(message);

        let mut message = message_2.clone();
        message.previous_counter ^= 1;
        tampered.push(message);

        let mut message = message_2.clone();
        message.counter ^= 2;
        tampered.push(message);

        let mut message = message_2.clone();
        let mut ratchet_key = message.ratchet_key.to_bytes();
        ratchet_key[3] ^= 1;
        message.ratchet_key = crate::crypto::x25519::PublicKey::from_bytes(ratchet_key);
        tampered.push(message);

        for message in tampered {
            assert!(matches!(
                DoubleRatchet::decrypt(&bob, &message, &rng, &config),
                Err(RatchetError::AuthenticationFailed)
            ));
        }

        // The counter selects the message key before the tag can be checked. Tampering with it
        // might already fail while looking up the key.
        let mut message = message_2.clone();
        message.counter ^= 1;
        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &message, &rng, &config),
            Err(RatchetError::DuplicateOrUnknownMessage(_, 0))
        ));

        let mut message = message_2.clone();
        message.counter ^= 1 << 31;
        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &message, &rng, &config),
            Err(RatchetError::TooManySkippedMessages(_, 25_000))
        ));

        // State was left untouched, the original message can still be decrypted.
        assert_eq!(bob.receiving_counter(), Some(1));
        let (bob, plaintext) = DoubleRatchet::decrypt(&bob, &message_2, &rng, &config).unwrap();
        assert_eq!(plaintext, b"second");
        assert!(bob.skipped_message_keys().is_empty());
    }

    #[test]
    fn skipped_message_keys_bound() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig {
            max_skipped_message_keys: 10,
            ..Default::default()
        };
        let (mut alice, bob) = init_pair(&rng);

        let mut messages = Vec::new();
        for _ in 0..12 {
            let (alice_i, message) = DoubleRatchet::encrypt(&alice, b"lost?", &config).unwrap();
            alice = alice_i;
            messages.push(message);
        }

        // Message 11 would require caching 11 keys.
        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &messages[11], &rng, &config),
            Err(RatchetError::TooManySkippedMessages(11, 10))
        ));
        assert!(bob.skipped_message_keys().is_empty());

        // Message 10 fits exactly.
        let (bob, _) = DoubleRatchet::decrypt(&bob, &messages[10], &rng, &config).unwrap();
        assert_eq!(bob.skipped_message_keys().len(), 10);

        // Jumps are bounded independently of the cache size.
        let config = RatchetConfig {
            max_forward_jump: 3,
            ..Default::default()
        };
        let (_, bob) = init_pair(&Rng::from_seed([1; 32]));
        assert!(matches!(
            DoubleRatchet::decrypt(&bob, &messages[5], &rng, &config),
            Err(RatchetError::TooManySkippedMessages(5, 3))
        ));
    }

    #[test]
    fn forward_secrecy() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig::default();
        let (alice, bob) = init_pair(&rng);

        let (alice, message_1) = DoubleRatchet::encrypt(&alice, b"secret", &config).unwrap();
        let (bob, _) = DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).unwrap();

        let (bob, message_2) = DoubleRatchet::encrypt(&bob, b"reply", &config).unwrap();
        let (alice, _) = DoubleRatchet::decrypt(&alice, &message_2, &rng, &config).unwrap();
        let (_alice, message_3) = DoubleRatchet::encrypt(&alice, b"more", &config).unwrap();
        let (bob, _) = DoubleRatchet::decrypt(&bob, &message_3, &rng, &config).unwrap();

        // A later, leaked state of Bob can't decrypt earlier messages anymore.
        assert!(DoubleRatchet::decrypt(&bob, &message_1, &rng, &config).is_err());
        assert!(bob.skipped_message_keys().is_empty());
    }

    #[test]
    fn receiving_chains_are_bounded() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig {
            max_receiving_chains: 2,
            ..Default::default()
        };
        let (mut alice, mut bob) = init_pair(&rng);

        for _ in 0..4 {
            let (alice_i, message) = DoubleRatchet::encrypt(&alice, b"ping", &config).unwrap();
            let (bob_i, _) = DoubleRatchet::decrypt(&bob, &message, &rng, &config).unwrap();
            let (bob_i, message) = DoubleRatchet::encrypt(&bob_i, b"pong", &config).unwrap();
            let (alice_i, _) = DoubleRatchet::decrypt(&alice_i, &message, &rng, &config).unwrap();
            alice = alice_i;
            bob = bob_i;
        }

        assert_eq!(alice.receiving_chains_len(), 2);
        assert_eq!(bob.receiving_chains_len(), 2);
    }

    #[test]
    fn message_too_large() {
        let rng = Rng::from_seed([1; 32]);
        let config = RatchetConfig {
            max_message_size: 4,
            ..Default::default()
        };
        let (alice, _bob) = init_pair(&rng);
        assert!(matches!(
            DoubleRatchet::encrypt(&alice, b"too long", &config),
            Err(RatchetError::MessageTooLarge(8, 4))
        ));
    }
}
