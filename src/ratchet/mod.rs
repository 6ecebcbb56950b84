// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet state machine.
//!
//! Every message is encrypted with its own key, derived from a symmetric-key ratchet ("chain").
//! Whenever the other party answers with a new ratchet public key, both sides perform a
//! Diffie-Hellman ratchet step, mixing fresh key agreement output into the root key and starting
//! new sending and receiving chains.
//!
//! <https://signal.org/docs/specifications/doubleratchet/>
mod double_ratchet;
mod keys;
mod skipped;
mod state;

pub use double_ratchet::{DoubleRatchet, RatchetError};
pub use keys::{CHAIN_KEY_SIZE, ChainKey, MessageKeys, ROOT_KEY_SIZE, RootKey};
pub use skipped::SkippedMessageKeys;
pub(crate) use state::SessionKeys;
pub use state::{PendingFriendRequest, PendingPreKey, RatchetState, ReceivingChain, SendingChain};
