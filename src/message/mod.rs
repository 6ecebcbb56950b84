// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire format of all messages exchanged between two parties of a session.
//!
//! Every message is framed by a small envelope:
//!
//! ```text
//! +---------+------+--------------------+
//! | version | type | body (CBOR)        |
//! | 1 byte  | 1 b  | variable           |
//! +---------+------+--------------------+
//! ```
//!
//! The version byte carries the current protocol version in both nibbles (`0x33`). Messages of
//! older or newer versions are rejected. The type byte identifies one of the three variants: a
//! regular ratchet message, a pre-key message establishing a session from a published pre-key
//! bundle and a friend-request message establishing a session from an identity key alone.
pub(crate) mod cbor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::crypto::aead::AeadTag;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey};
use crate::key_bundle::{OneTimePreKeyId, SignedPreKeyId};

pub use cbor::{CborError, EncodeError};

/// Protocol version of all messages produced by this crate.
pub const CURRENT_VERSION: u8 = 3;

/// Size of the encoded header of a ratchet message which is authenticated as associated data.
pub const HEADER_SIZE: usize = PUBLIC_KEY_SIZE + 4 + 4;

const VERSION_BYTE: u8 = (CURRENT_VERSION << 4) | CURRENT_VERSION;

/// Type tag of an encoded message, placed right after the version byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ratchet = 1,
    PreKey = 3,
    FriendRequest = 101,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Ratchet),
            3 => Ok(MessageType::PreKey),
            101 => Ok(MessageType::FriendRequest),
            tag => Err(DecodeError::UnknownMessageType(tag)),
        }
    }
}

/// Common interface of all message variants which can be sent over the wire.
pub trait CipherMessage {
    fn message_type(&self) -> MessageType;

    /// Encodes the message including its envelope.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError>;
}

/// Regular message of an established session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// Current ratchet public key of the sender.
    pub ratchet_key: PublicKey,

    /// Position of this message in the sender's current sending chain.
    pub counter: u32,

    /// Length of the sender's previous sending chain.
    pub previous_counter: u32,

    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub tag: AeadTag,
}

impl RatchetMessage {
    /// Encodes the header fields for use as associated data.
    ///
    /// Layout: ratchet key, counter and previous counter, both counters as big-endian u32.
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        header_bytes(&self.ratchet_key, self.counter, self.previous_counter)
    }
}

pub(crate) fn header_bytes(
    ratchet_key: &PublicKey,
    counter: u32,
    previous_counter: u32,
) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[..PUBLIC_KEY_SIZE].copy_from_slice(ratchet_key.as_bytes());
    bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + 4].copy_from_slice(&counter.to_be_bytes());
    bytes[PUBLIC_KEY_SIZE + 4..].copy_from_slice(&previous_counter.to_be_bytes());
    bytes
}

/// First messages of an initiator, carrying everything the responder needs to establish the
/// session from their pre-key secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub identity_key: PublicKey,
    pub base_key: PublicKey,
    pub signed_prekey_id: SignedPreKeyId,
    pub onetime_prekey_id: Option<OneTimePreKeyId>,
    pub message: RatchetMessage,
}

/// First messages of an initiator who only knows the identity key of the other party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequestMessage {
    pub identity_key: PublicKey,
    pub base_key: PublicKey,
    pub message: RatchetMessage,
}

/// Any message which can be received from the other party.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Ratchet(RatchetMessage),
    PreKey(PreKeyMessage),
    FriendRequest(FriendRequestMessage),
}

impl WireMessage {
    /// Decodes a message, rejecting anything larger than the default size limit.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_with_limit(bytes, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// The inner ratchet message, present in all variants.
    pub fn ratchet_message(&self) -> &RatchetMessage {
        match self {
            WireMessage::Ratchet(message) => message,
            WireMessage::PreKey(message) => &message.message,
            WireMessage::FriendRequest(message) => &message.message,
        }
    }

    /// Identity key of the sender, only included in session-establishing messages.
    pub fn identity_key(&self) -> Option<&PublicKey> {
        match self {
            WireMessage::Ratchet(_) => None,
            WireMessage::PreKey(message) => Some(&message.identity_key),
            WireMessage::FriendRequest(message) => Some(&message.identity_key),
        }
    }

    /// Base key of the initiator, only included in session-establishing messages.
    pub fn base_key(&self) -> Option<&PublicKey> {
        match self {
            WireMessage::Ratchet(_) => None,
            WireMessage::PreKey(message) => Some(&message.base_key),
            WireMessage::FriendRequest(message) => Some(&message.base_key),
        }
    }
}

impl CipherMessage for WireMessage {
    fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Ratchet(message) => message.message_type(),
            WireMessage::PreKey(message) => message.message_type(),
            WireMessage::FriendRequest(message) => message.message_type(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }
}

macro_rules! impl_cipher_message {
    ($ty:ty, $message_type:expr) => {
        impl CipherMessage for $ty {
            fn message_type(&self) -> MessageType {
                $message_type
            }

            fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
                encode_envelope($message_type, self)
            }
        }
    };
}

impl_cipher_message!(RatchetMessage, MessageType::Ratchet);
impl_cipher_message!(PreKeyMessage, MessageType::PreKey);
impl_cipher_message!(FriendRequestMessage, MessageType::FriendRequest);

impl From<RatchetMessage> for WireMessage {
    fn from(value: RatchetMessage) -> Self {
        WireMessage::Ratchet(value)
    }
}

impl From<PreKeyMessage> for WireMessage {
    fn from(value: PreKeyMessage) -> Self {
        WireMessage::PreKey(value)
    }
}

impl From<FriendRequestMessage> for WireMessage {
    fn from(value: FriendRequestMessage) -> Self {
        WireMessage::FriendRequest(value)
    }
}

/// Encodes a message into its wire representation.
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, EncodeError> {
    match message {
        WireMessage::Ratchet(inner) => encode_envelope(MessageType::Ratchet, inner),
        WireMessage::PreKey(inner) => encode_envelope(MessageType::PreKey, inner),
        WireMessage::FriendRequest(inner) => encode_envelope(MessageType::FriendRequest, inner),
    }
}

/// Decodes a message from its wire representation, using the default size limit.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, DecodeError> {
    decode_with_limit(bytes, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Decodes a message from its wire representation.
///
/// Buffers larger than `max_size` are rejected before looking at their contents.
pub fn decode_with_limit(bytes: &[u8], max_size: usize) -> Result<WireMessage, DecodeError> {
    if bytes.len() > max_size {
        return Err(DecodeError::TooLarge(bytes.len(), max_size));
    }

    let [version, tag, body @ ..] = bytes else {
        return Err(DecodeError::Truncated);
    };

    if version >> 4 != CURRENT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version >> 4));
    }

    let message_type = MessageType::try_from(*tag)?;

    if body.is_empty() {
        return Err(DecodeError::Truncated);
    }

    let mut reader = body;
    let message = match message_type {
        MessageType::Ratchet => WireMessage::Ratchet(cbor::decode_cbor(&mut reader)?),
        MessageType::PreKey => WireMessage::PreKey(cbor::decode_cbor(&mut reader)?),
        MessageType::FriendRequest => WireMessage::FriendRequest(cbor::decode_cbor(&mut reader)?),
    };

    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.len()));
    }

    Ok(message)
}

fn encode_envelope<T: Serialize>(
    message_type: MessageType,
    body: &T,
) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = vec![VERSION_BYTE, message_type as u8];
    bytes.extend(cbor::encode_cbor(body)?);
    Ok(bytes)
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is too short")]
    Truncated,

    #[error("unsupported message version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("invalid message body: {0}")]
    Body(#[from] CborError),

    #[error("{0} unexpected bytes after message body")]
    TrailingBytes(usize),

    #[error("message of {0} bytes exceeds maximum size of {1} bytes")]
    TooLarge(usize, usize),
}
