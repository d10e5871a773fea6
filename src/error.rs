use thiserror::Error;

use crate::amqp::AmqpError;
use crate::config::ConfigError;
use crate::message::MessageError;
use crate::token::TokenError;

/// Errors surfaced by the synchronous transport and client API
///
/// Failures that happen inside a tick never reach the caller as an error; they
/// are turned into a reconnect, an ERROR confirmation or a rejected delivery.
#[derive(Debug, Error)]
pub enum IoTHubError {
    /// The transport configuration did not validate
    #[error("invalid transport configuration: {0}")]
    Config(#[from] ConfigError),
    /// A SAS token could not be produced
    #[error("{0}")]
    Token(#[from] TokenError),
    /// The AMQP engine or value model reported a failure
    #[error("{0}")]
    Amqp(#[from] AmqpError),
    /// A device message could not be built
    #[error("{0}")]
    Message(#[from] MessageError),
    /// An option was not recognised or carried the wrong type of value
    #[error("invalid option `{0}`")]
    InvalidOption(String),
    /// The device could not be bound to (or released from) the transport
    #[error("device registration failed: {0}")]
    Registration(String),
    /// The hub did not confirm an event
    #[error("event was not confirmed by the hub")]
    SendFailed,
}
