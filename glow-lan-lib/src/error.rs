use thiserror::Error;

use crate::dispatcher::ResponseKey;
use crate::protocol::MalformedMessage;

/// Errors surfaced by the dispatcher and the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("no complete response for {0} before the deadline")]
    Timeout(ResponseKey),

    #[error("an exchange for {0} is already in flight")]
    ExchangeInFlight(ResponseKey),

    #[error("exchange for {0} was dropped before completion")]
    Abandoned(ResponseKey),

    #[error("client has been shut down")]
    ShutDown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
