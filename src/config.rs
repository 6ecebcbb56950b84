// SPDX-License-Identifier: MIT OR Apache-2.0

//! Limits bounding the resources a single session may allocate.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum number of cached message keys for messages which arrived out-of-order or not
/// at all yet.
pub const DEFAULT_MAX_SKIPPED_MESSAGE_KEYS: usize = 2000;

/// Default maximum number of messages a single incoming message may "jump" ahead in a chain.
pub const DEFAULT_MAX_FORWARD_JUMP: u32 = 25_000;

/// Default maximum number of receiving chains kept around for late messages from older ratchet
/// keys of the other party.
pub const DEFAULT_MAX_RECEIVING_CHAINS: usize = 5;

/// Default maximum number of archived session states per session record.
pub const DEFAULT_MAX_ARCHIVED_STATES: usize = 40;

/// Default maximum size in bytes of an encoded wire message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// Upper bound of the skipped message key cache.
    ///
    /// A message which would require caching more keys than this fails with
    /// `TooManySkippedMessages` instead of growing the cache.
    pub max_skipped_message_keys: usize,

    /// Upper bound of message keys derived while handling one incoming message.
    pub max_forward_jump: u32,

    /// Number of receiving chains to retain after Diffie-Hellman ratchet steps.
    pub max_receiving_chains: usize,

    /// Number of previous session states to retain in a session record.
    pub max_archived_states: usize,

    /// Wire messages larger than this are rejected before decoding.
    pub max_message_size: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: DEFAULT_MAX_SKIPPED_MESSAGE_KEYS,
            max_forward_jump: DEFAULT_MAX_FORWARD_JUMP,
            max_receiving_chains: DEFAULT_MAX_RECEIVING_CHAINS,
            max_archived_states: DEFAULT_MAX_ARCHIVED_STATES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RatchetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_receiving_chains == 0 {
            return Err(ConfigError::Zero("max_receiving_chains"));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("max_message_size"));
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} needs to be larger than zero")]
    Zero(&'static str),
}
