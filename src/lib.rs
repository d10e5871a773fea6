//! Azure IoT Hub device transport over AMQP 1.0
//!
//! The transport is a polling state machine: every call to
//! [`Transport::do_work`] advances the connection by one step. It builds the
//! AMQP connection, authenticates with SAS tokens over CBS, keeps the token
//! fresh, sends queued events and hands cloud to device messages upwards.
//! Anything that fails tears the connection down and the next call starts
//! over, without losing queued events.
//!
//! The AMQP wire protocol itself is provided by an [`AmqpEngine`]
//! implementation.
//!
//! ## Feature flags
//!
//! - `async-client` (default): [`IoTHubClient`], which drives a transport on a tokio interval
//!
//! # Examples
//!
//! Driving the transport by hand
//! ```ignore
//! use azure_iot_amqp::{
//!     AmqpTransport, ClientConfig, ClientCallbacks, EventItem, Message, MessageDisposition,
//!     Transport, TransportConfig, WaitingList,
//! };
//!
//! struct Handler;
//!
//! impl ClientCallbacks for Handler {
//!     fn message_received(&mut self, message: Message) -> MessageDisposition {
//!         println!("{:?}", message);
//!         MessageDisposition::Accepted
//!     }
//! }
//!
//! let upper = ClientConfig::from_connection_string(
//!     "HostName=iothubname.azure-devices.net;DeviceId=MyDeviceId;SharedAccessKey=TheAccessKey",
//! )?;
//! let device = upper.device();
//! let waiting = WaitingList::new();
//! let mut transport = AmqpTransport::create(
//!     MyEngine::new(),
//!     TransportConfig {
//!         upper_config: Some(upper),
//!         waiting_to_send: Some(waiting.clone()),
//!     },
//! )?;
//! let _device = transport.register(&device, &waiting)?;
//!
//! waiting.push(EventItem::with_callback(Message::new(b"hello".to_vec()), |result| {
//!     println!("confirmed: {:?}", result);
//! }));
//!
//! let mut handler = Handler;
//! loop {
//!     transport.do_work(Some(&mut handler));
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// IoT SDK package version
pub const SDK_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// The AMQP engine seam
pub mod amqp;
/// The AMQP device transport
pub mod amqp_transport;
/// The IoT Hub client
#[cfg(feature = "async-client")]
pub mod client;
/// Time source
pub mod clock;
/// Transport configuration and options
pub mod config;
/// Errors
pub mod error;
/// Message types for communicating with the IoT Hub
pub mod message;
/// Outbound event queue
pub mod queue;
/// Shared access signature tokens
pub mod token;
/// Transport types
pub mod transport;

pub use crate::amqp::{AmqpEngine, AmqpError};
pub use crate::amqp_transport::{AmqpTransport, ConnectionStatus};
#[cfg(feature = "async-client")]
pub use crate::client::IoTHubClient;
pub use crate::clock::{Clock, SystemClock};
pub use crate::config::{ClientConfig, DeviceConfig, OptionValue, TransportConfig, TransportSettings};
pub use crate::error::IoTHubError;
pub use crate::message::{ConfirmationResult, Message, MessageBuilder, MessageDisposition};
pub use crate::queue::{EventItem, WaitingList};
pub use crate::token::{DeviceKeyTokenSource, SasTokenSource, TokenError, TokenProvider, TokenSource};
pub use crate::transport::{ClientCallbacks, DeviceHandle, SendStatus, Transport};

/// Result type for the transport and client
pub type Result<T> = std::result::Result<T, IoTHubError>;
