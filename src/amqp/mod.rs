//! The AMQP 1.0 engine the transport is built on
//!
//! Framing, TLS and SASL negotiation belong to the engine. This module only
//! describes the handles, values and events the transport exchanges with it.

mod engine;
mod message;
mod value;

pub use engine::{
    AmqpEngine, AmqpEvent, CbsState, DeliveryId, DeliveryOutcome, DeliveryTag, LinkConfig,
    LinkState, OperationResult, ReceiverSettleMode, Role, SaslMechanismKind, SendResult,
    TlsIoConfig,
};
pub use message::{AmqpMessage, BodyType, MessageBodySection, Properties};
pub use value::AmqpValue;

use thiserror::Error;

/// Failures reported by the AMQP engine or the value model
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AmqpError {
    /// A value was not of the type the operation needs
    #[error("expected AMQP {expected}, found {found}")]
    TypeMismatch {
        ///
        expected: &'static str,
        ///
        found: &'static str,
    },
    /// Index past the end of a map or body
    #[error("index {index} out of range for {len} entries")]
    OutOfRange {
        ///
        index: usize,
        ///
        len: usize,
    },
    /// Symbols are restricted to ASCII
    #[error("symbol `{0}` is not ASCII")]
    NonAsciiSymbol(String),
    /// An engine primitive failed
    #[error("{operation} failed: {reason}")]
    Engine {
        /// Name of the engine call
        operation: &'static str,
        ///
        reason: String,
    },
}

impl AmqpError {
    /// Failure of the engine call `operation`
    pub fn engine(operation: &'static str, reason: impl Into<String>) -> Self {
        AmqpError::Engine {
            operation,
            reason: reason.into(),
        }
    }
}
