//! Error types for the command arbiter.

use telemux_common::TransportError;
use thiserror::Error;

/// Errors returned by [`CommandArbiter::send`](crate::CommandArbiter::send).
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// Another command is in flight and the bounded lock wait elapsed.
    #[error("transport busy: another command in flight")]
    Busy,

    /// No matching response arrived within the caller's budget.
    #[error("command timed out: {command:?}")]
    Timeout {
        /// The command that timed out.
        command: String,
    },

    /// The modem answered with a terminal failure token.
    #[error("command failed: {response:?}")]
    CommandFailed {
        /// Accumulated response text up to and including the failure token.
        response: String,
    },

    /// Writing the command to the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The control ring channel was closed (classifier gone).
    #[error("control channel closed")]
    ChannelClosed,
}
