// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::message::WireMessage;

/// Progress of a user-initiated session reset with a remote party.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResetStatus {
    /// No reset is in progress.
    #[default]
    None,

    /// We asked the other party to reset the session and wait for a message in a new session.
    RequestSent,

    /// The other party asked us to reset the session.
    RequestReceived,
}

/// Host policy deciding over session resets and the acceptance of new sessions.
pub trait SessionResetHandler<ID> {
    type Error: Error + Send + Sync + 'static;

    fn reset_status(&self, id: &ID) -> SessionResetStatus;

    /// Called before a pre-key or friend-request message establishes a session while no session
    /// with this party exists. Returning an error rejects the message.
    fn verify_new_session(&self, id: &ID, message: &WireMessage) -> Result<(), Self::Error>;
}

/// Accepts every new session and never resets.
#[derive(Clone, Debug, Default)]
pub struct NoSessionReset;

impl<ID> SessionResetHandler<ID> for NoSessionReset {
    type Error = std::convert::Infallible;

    fn reset_status(&self, _id: &ID) -> SessionResetStatus {
        SessionResetStatus::None
    }

    fn verify_new_session(&self, _id: &ID, _message: &WireMessage) -> Result<(), Self::Error> {
        Ok(())
    }
}
