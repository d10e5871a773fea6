use super::{AmqpError, AmqpMessage, AmqpValue};
use crate::config::OptionValue;

/// Tag the transport assigns to each outgoing delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

/// Engine assigned id of an incoming delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub u64);

/// SASL mechanisms the transport asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanismKind {
    /// MSSBCBS, authentication happens later over CBS
    MsSbCbs,
}

///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    ///
    Sender,
    ///
    Receiver,
}

///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    /// Settle as soon as the disposition is sent
    First,
    /// Settle once the sender settles
    Second,
}

/// Where the TLS IO connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsIoConfig<'a> {
    ///
    pub hostname: &'a str,
    ///
    pub port: u16,
}

/// Addressing of a new link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig<'a> {
    ///
    pub name: &'a str,
    ///
    pub role: Role,
    ///
    pub source: &'a str,
    ///
    pub target: &'a str,
}

/// State of a message sender or receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    ///
    Idle,
    ///
    Opening,
    ///
    Open,
    ///
    Closing,
    ///
    Error,
}

/// State of the CBS node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbsState {
    ///
    Closed,
    ///
    Opening,
    ///
    Open,
    ///
    Error,
}

/// Result of a CBS operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    ///
    Ok,
    /// The request could not be carried out
    Error,
    /// The CBS node answered with a failure status
    OperationFailed {
        ///
        status_code: u32,
        ///
        description: String,
    },
    /// The CBS instance was closed before answering
    InstanceClosed,
}

/// Result of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// The hub accepted the delivery
    Ok,
    ///
    Error,
    ///
    Timeout,
    ///
    Cancelled,
}

/// How an incoming delivery is settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    ///
    Accepted,
    /// Returned to the hub for redelivery
    Released,
    ///
    Rejected {
        /// AMQP error condition
        condition: String,
        ///
        description: String,
    },
}

/// Completions and notifications produced while the engine does work
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpEvent {
    ///
    CbsStateChanged(CbsState),
    /// The pending put-token was answered
    PutTokenComplete(OperationResult),
    ///
    SenderStateChanged {
        ///
        new: LinkState,
        ///
        previous: LinkState,
    },
    /// A delivery started with `send` was settled
    SendComplete {
        ///
        tag: DeliveryTag,
        ///
        result: SendResult,
    },
    ///
    ReceiverStateChanged {
        ///
        new: LinkState,
        ///
        previous: LinkState,
    },
    /// A message arrived on the receiver and awaits `settle`
    MessageReceived {
        ///
        delivery: DeliveryId,
        ///
        message: AmqpMessage,
    },
    /// The underlying IO failed
    ConnectionError(String),
}

/// The AMQP 1.0 engine primitives the transport drives
///
/// Handles are owned values; dropping a handle destroys the underlying
/// object. Nothing blocks: completions are reported by [`connection_do_work`].
///
/// [`connection_do_work`]: AmqpEngine::connection_do_work
pub trait AmqpEngine {
    /// Descriptor of an IO implementation
    type IoInterface;
    /// TLS or SASL IO
    type Io;
    ///
    type SaslMechanism;
    ///
    type Connection;
    ///
    type Session;
    /// Claims-based security node on a session
    type Cbs;
    ///
    type Link;
    ///
    type Sender;
    ///
    type Receiver;

    /// The platform TLS IO implementation
    fn default_tls_io_interface(&mut self) -> Result<Self::IoInterface, AmqpError>;
    ///
    fn create_tls_io(
        &mut self,
        interface: &Self::IoInterface,
        config: &TlsIoConfig<'_>,
    ) -> Result<Self::Io, AmqpError>;
    /// Pass an option to an IO, typically certificates or proxy settings
    fn set_io_option(
        &mut self,
        io: &mut Self::Io,
        name: &str,
        value: &OptionValue,
    ) -> Result<(), AmqpError>;
    ///
    fn create_sasl_mechanism(
        &mut self,
        kind: SaslMechanismKind,
    ) -> Result<Self::SaslMechanism, AmqpError>;
    /// The SASL client IO implementation
    fn sasl_client_io_interface(&mut self) -> Result<Self::IoInterface, AmqpError>;
    /// SASL IO layered over `tls_io`
    fn create_sasl_io(
        &mut self,
        interface: &Self::IoInterface,
        tls_io: &mut Self::Io,
        mechanism: &mut Self::SaslMechanism,
    ) -> Result<Self::Io, AmqpError>;
    ///
    fn create_connection(
        &mut self,
        io: &mut Self::Io,
        hostname: &str,
        container_id: &str,
    ) -> Result<Self::Connection, AmqpError>;
    /// Turn frame tracing on or off
    fn set_connection_trace(
        &mut self,
        connection: &mut Self::Connection,
        trace: bool,
    ) -> Result<(), AmqpError>;
    ///
    fn create_session(
        &mut self,
        connection: &mut Self::Connection,
    ) -> Result<Self::Session, AmqpError>;
    ///
    fn set_incoming_window(
        &mut self,
        session: &mut Self::Session,
        window: u32,
    ) -> Result<(), AmqpError>;
    ///
    fn set_outgoing_window(
        &mut self,
        session: &mut Self::Session,
        window: u32,
    ) -> Result<(), AmqpError>;
    ///
    fn create_cbs(&mut self, session: &mut Self::Session) -> Result<Self::Cbs, AmqpError>;
    ///
    fn open_cbs(&mut self, cbs: &mut Self::Cbs) -> Result<(), AmqpError>;
    /// Start a put-token, answered by [`AmqpEvent::PutTokenComplete`]
    fn put_token(
        &mut self,
        cbs: &mut Self::Cbs,
        token_type: &str,
        audience: &str,
        token: &str,
    ) -> Result<(), AmqpError>;
    ///
    fn create_link(
        &mut self,
        session: &mut Self::Session,
        config: &LinkConfig<'_>,
    ) -> Result<Self::Link, AmqpError>;
    ///
    fn set_link_attach_properties(
        &mut self,
        link: &mut Self::Link,
        properties: &AmqpValue,
    ) -> Result<(), AmqpError>;
    ///
    fn set_link_max_message_size(
        &mut self,
        link: &mut Self::Link,
        size: u64,
    ) -> Result<(), AmqpError>;
    ///
    fn set_link_receiver_settle_mode(
        &mut self,
        link: &mut Self::Link,
        mode: ReceiverSettleMode,
    ) -> Result<(), AmqpError>;
    ///
    fn create_sender(&mut self, link: &mut Self::Link) -> Result<Self::Sender, AmqpError>;
    /// Open the sender, reported by [`AmqpEvent::SenderStateChanged`]
    fn open_sender(&mut self, sender: &mut Self::Sender) -> Result<(), AmqpError>;
    /// Start a delivery, answered by [`AmqpEvent::SendComplete`] with the same tag
    fn send(
        &mut self,
        sender: &mut Self::Sender,
        message: &AmqpMessage,
        tag: DeliveryTag,
    ) -> Result<(), AmqpError>;
    ///
    fn create_receiver(&mut self, link: &mut Self::Link) -> Result<Self::Receiver, AmqpError>;
    /// Open the receiver, deliveries arrive as [`AmqpEvent::MessageReceived`]
    fn open_receiver(&mut self, receiver: &mut Self::Receiver) -> Result<(), AmqpError>;
    ///
    fn close_receiver(&mut self, receiver: &mut Self::Receiver) -> Result<(), AmqpError>;
    /// Settle an incoming delivery
    fn settle(
        &mut self,
        receiver: &mut Self::Receiver,
        delivery: DeliveryId,
        outcome: DeliveryOutcome,
    ) -> Result<(), AmqpError>;
    /// Run the connection once, returning what completed meanwhile
    fn connection_do_work(&mut self, connection: &mut Self::Connection) -> Vec<AmqpEvent>;
}
