//! AMQP transport for a single device
//!
//! All work happens in [`Transport::do_work`]. Each call builds whatever part
//! of the connection is missing, authenticates over CBS, opens the links,
//! runs the engine once and sends everything waiting. A failure anywhere tears
//! the whole connection down and the next call starts over.

mod cbs;
mod connection;
mod receiver;
mod sender;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use self::cbs::{AuthState, CbsAuthenticator};
use self::connection::ConnectionStack;
use self::receiver::{disposition_outcome, read_failure_outcome, to_device_message, MessageReceiver};
use self::sender::{to_amqp_message, EventSender};
use crate::amqp::{
    AmqpEngine, AmqpError, AmqpEvent, AmqpValue, CbsState, DeliveryTag, OperationResult,
    SendResult,
};
use crate::clock::{elapsed_ms, Clock, SystemClock};
use crate::config::{
    Credential, DeviceConfig, OptionValue, TransportConfig, TransportSettings,
    CLIENT_VERSION_PROPERTY, OPTION_LOG_TRACE,
};
use crate::error::IoTHubError;
use crate::message::ConfirmationResult;
use crate::queue::{EventItem, WaitingList};
use crate::token::{DeviceKeyTokenSource, SasTokenSource, TokenError, TokenProvider};
use crate::transport::{ClientCallbacks, DeviceHandle, SendStatus, Transport};
use crate::SDK_VERSION;

/// Failure inside a tick, always answered by tearing the connection down
#[derive(Debug, Error)]
pub(crate) enum TickError {
    #[error(transparent)]
    Amqp(#[from] AmqpError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("put-token not answered within {0} ms")]
    PutTokenTimeout(u64),
    #[error("put-token failed: {0:?}")]
    PutTokenFailed(OperationResult),
    #[error("{0} link reported an error")]
    LinkError(&'static str),
    #[error("CBS reported an error")]
    CbsError,
    #[error("connection error: {0}")]
    Connection(String),
}

/// Where the connection currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection exists
    Disconnected,
    /// Connection built, no token put yet
    Connecting,
    /// Waiting for the first put-token answer
    Authenticating,
    /// Token accepted, the sender is not open yet
    Authenticated,
    /// Events are flowing
    Operational,
}

/// Addresses derived from the hub and device names
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Addresses {
    pub(crate) fqdn: String,
    pub(crate) devices_path: String,
    pub(crate) send_target: String,
    pub(crate) receive_source: String,
}

impl Addresses {
    fn new(iot_hub_name: &str, iot_hub_suffix: &str, device_id: &str) -> Self {
        let fqdn = format!("{}.{}", iot_hub_name, iot_hub_suffix);
        let devices_path = format!("{}/devices/{}", fqdn, device_id);
        Addresses {
            send_target: format!("amqps://{}/messages/events", devices_path),
            receive_source: format!("amqps://{}/messages/devicebound", devices_path),
            fqdn,
            devices_path,
        }
    }
}

/// Attach properties announcing the client version
pub(crate) fn client_version_properties() -> Result<AmqpValue, AmqpError> {
    let mut properties = AmqpValue::map();
    properties.set_map_value(
        AmqpValue::symbol(CLIENT_VERSION_PROPERTY)?,
        AmqpValue::string(format!("iothubclient/{}", SDK_VERSION)),
    )?;
    Ok(properties)
}

/// An event the engine is delivering
struct InFlight {
    item: EventItem,
    sent_at: DateTime<Utc>,
}

/// IoT Hub device transport over AMQP
pub struct AmqpTransport<E: AmqpEngine, C: Clock = SystemClock> {
    engine: E,
    clock: C,
    device_id: String,
    credential: Credential,
    tokens: TokenProvider,
    addresses: Addresses,
    settings: TransportSettings,
    io_options: Vec<(String, OptionValue)>,
    waiting_to_send: WaitingList,
    in_progress: BTreeMap<DeliveryTag, InFlight>,
    next_tag: u64,
    registered: bool,
    subscribed: bool,
    receiver: Option<MessageReceiver<E>>,
    sender: Option<EventSender<E>>,
    stack: Option<ConnectionStack<E>>,
    auth: CbsAuthenticator,
}

impl<E: AmqpEngine> AmqpTransport<E> {
    /// Validate `config` and create a disconnected transport
    pub fn create(engine: E, config: TransportConfig) -> crate::Result<Self> {
        Self::create_with_clock(engine, config, SystemClock)
    }
}

impl<E: AmqpEngine, C: Clock> AmqpTransport<E, C> {
    /// Like [`AmqpTransport::create`] with a custom time source
    pub fn create_with_clock(engine: E, config: TransportConfig, clock: C) -> crate::Result<Self> {
        let config = config.validate()?;
        let addresses = Addresses::new(
            &config.iot_hub_name,
            &config.iot_hub_suffix,
            &config.device_id,
        );
        let tokens = match &config.credential {
            Credential::DeviceKey(key) => {
                DeviceKeyTokenSource::new(addresses.devices_path.clone(), key.clone(), "").into()
            }
            Credential::SasToken(sas) => SasTokenSource::new(sas.clone()).into(),
        };

        debug!("Created AMQP transport for {}", addresses.devices_path);
        Ok(AmqpTransport {
            engine,
            clock,
            device_id: config.device_id,
            credential: config.credential,
            tokens,
            addresses,
            settings: TransportSettings::default(),
            io_options: Vec::new(),
            waiting_to_send: config.waiting_to_send,
            in_progress: BTreeMap::new(),
            next_tag: 0,
            registered: false,
            subscribed: false,
            receiver: None,
            sender: None,
            stack: None,
            auth: CbsAuthenticator::new(),
        })
    }

    /// Current timing settings
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// The engine the transport drives
    pub fn engine(&self) -> &E {
        &self.engine
    }

    ///
    pub fn connection_status(&self) -> ConnectionStatus {
        if self.stack.is_none() {
            return ConnectionStatus::Disconnected;
        }
        match self.auth.state() {
            AuthState::NotStarted => ConnectionStatus::Connecting,
            AuthState::PutTokenSent {
                refreshing: false, ..
            } => ConnectionStatus::Authenticating,
            _ if self.sender.as_ref().is_some_and(EventSender::is_open) => {
                ConnectionStatus::Operational
            }
            _ => ConnectionStatus::Authenticated,
        }
    }

    fn tick(&mut self, client: &mut dyn ClientCallbacks) -> Result<(), TickError> {
        let now = self.clock.now();

        if self.stack.is_none() {
            debug!("Connecting to {}", self.addresses.fqdn);
            let stack = ConnectionStack::establish(
                &mut self.engine,
                &self.addresses.fqdn,
                &self.io_options,
                self.settings.trace,
            )?;
            info!("AMQP connection to {} established", self.addresses.fqdn);
            self.stack = Some(stack);
            self.auth.reset();
        }
        let Some(stack) = self.stack.as_mut() else {
            return Ok(());
        };

        self.auth.step(
            &mut self.engine,
            &mut stack.cbs,
            &self.tokens,
            &self.addresses.devices_path,
            &self.settings,
            now,
        )?;

        if !self.subscribed {
            if let Some(receiver) = self.receiver.take() {
                debug!("Closing message receiver");
                receiver.close(&mut self.engine);
            }
        }
        if self.auth.is_authenticated() {
            if self.subscribed && self.receiver.is_none() {
                self.receiver = Some(MessageReceiver::create(
                    &mut self.engine,
                    &mut stack.session,
                    &self.addresses,
                )?);
            }
            if self.sender.is_none() {
                self.sender = Some(EventSender::create(
                    &mut self.engine,
                    &mut stack.session,
                    &self.addresses,
                )?);
            }
        }

        let events = self.engine.connection_do_work(&mut stack.connection);
        self.process_events(events, client)?;

        if self.auth.can_send() && self.sender.as_ref().is_some_and(EventSender::is_open) {
            self.send_pending(client, now)?;
        }
        Ok(())
    }

    /// Handle every event, reporting the first failure after all are seen
    fn process_events(
        &mut self,
        events: Vec<AmqpEvent>,
        client: &mut dyn ClientCallbacks,
    ) -> Result<(), TickError> {
        let mut failure = None;
        for event in events {
            if let Err(e) = self.process_event(event, client) {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn process_event(
        &mut self,
        event: AmqpEvent,
        client: &mut dyn ClientCallbacks,
    ) -> Result<(), TickError> {
        match event {
            AmqpEvent::CbsStateChanged(CbsState::Error) => Err(TickError::CbsError),
            AmqpEvent::CbsStateChanged(state) => {
                trace!("CBS state {:?}", state);
                Ok(())
            }
            AmqpEvent::PutTokenComplete(result) => self.auth.on_put_token_complete(result),
            AmqpEvent::SenderStateChanged { new, previous } => match self.sender.as_mut() {
                Some(sender) => sender.on_state_changed(new, previous),
                None => Ok(()),
            },
            AmqpEvent::ReceiverStateChanged { new, previous } => match self.receiver.as_mut() {
                Some(receiver) => receiver.on_state_changed(new, previous),
                None => Ok(()),
            },
            AmqpEvent::SendComplete { tag, result } => {
                match self.in_progress.remove(&tag) {
                    Some(in_flight) => {
                        let result = match result {
                            SendResult::Ok => ConfirmationResult::Ok,
                            failure => {
                                warn!("Event {:?} was not delivered: {:?}", tag, failure);
                                ConfirmationResult::Error
                            }
                        };
                        client.send_complete(in_flight.item, result);
                    }
                    None => debug!("Ignoring completion for {:?}, no longer in flight", tag),
                }
                Ok(())
            }
            AmqpEvent::MessageReceived { delivery, message } => {
                let Some(receiver) = self.receiver.as_mut() else {
                    debug!("Dropping delivery {:?}, receiver is closed", delivery);
                    return Ok(());
                };
                let outcome = match to_device_message(&message) {
                    Ok(message) => disposition_outcome(client.message_received(message)),
                    Err(e) => {
                        warn!("Rejecting delivery {:?}: {}", delivery, e);
                        read_failure_outcome()
                    }
                };
                self.engine.settle(&mut receiver.receiver, delivery, outcome)?;
                Ok(())
            }
            AmqpEvent::ConnectionError(reason) => Err(TickError::Connection(reason)),
        }
    }

    /// Move the whole waiting list in flight and hand each event to the sender
    fn send_pending(
        &mut self,
        client: &mut dyn ClientCallbacks,
        now: DateTime<Utc>,
    ) -> Result<(), TickError> {
        let Some(sender) = self.sender.as_mut() else {
            return Ok(());
        };
        let batch = self.waiting_to_send.take_all();
        if batch.is_empty() {
            return Ok(());
        }
        trace!("Sending {} events", batch.len());

        let mut tags = Vec::with_capacity(batch.len());
        for item in batch {
            let tag = DeliveryTag(self.next_tag);
            self.next_tag += 1;
            self.in_progress.insert(tag, InFlight { item, sent_at: now });
            tags.push(tag);
        }

        for tag in tags {
            let Some(in_flight) = self.in_progress.get(&tag) else {
                continue;
            };
            match to_amqp_message(in_flight.item.message()) {
                Ok(message) => self.engine.send(&mut sender.sender, &message, tag)?,
                Err(e) => {
                    warn!("Failed preparing event {:?}: {}", tag, e);
                    if let Some(in_flight) = self.in_progress.remove(&tag) {
                        client.send_complete(in_flight.item, ConfirmationResult::Error);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fail events that have waited longer than the send timeout
    fn expire_in_progress(&mut self, client: &mut dyn ClientCallbacks) {
        let timeout = self.settings.message_send_timeout;
        if timeout == 0 {
            return;
        }
        let now = self.clock.now();
        let expired: Vec<DeliveryTag> = self
            .in_progress
            .iter()
            .filter(|(_, in_flight)| elapsed_ms(in_flight.sent_at, now) >= timeout)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in expired {
            if let Some(in_flight) = self.in_progress.remove(&tag) {
                warn!("Event {:?} timed out after {} ms", tag, timeout);
                client.send_complete(in_flight.item, ConfirmationResult::Error);
            }
        }
    }

    /// Close the device links, returning events in flight to the waiting list
    fn release_links(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.close(&mut self.engine);
        }
        self.sender = None;

        let returned = std::mem::take(&mut self.in_progress);
        if !returned.is_empty() {
            debug!("Returning {} events to the waiting list", returned.len());
        }
        self.waiting_to_send
            .requeue_front(returned.into_values().map(|in_flight| in_flight.item));
    }

    /// Close links and connection, returning events in flight to the waiting list
    fn teardown(&mut self) {
        self.release_links();
        if self.stack.take().is_some() {
            info!("AMQP connection to {} torn down", self.addresses.fqdn);
        }
        self.auth.reset();
    }
}

impl<E: AmqpEngine, C: Clock> Transport for AmqpTransport<E, C> {
    fn set_option(&mut self, name: &str, value: OptionValue) -> crate::Result<()> {
        if self.settings.apply(name, &value)? {
            if name == OPTION_LOG_TRACE {
                if let Some(stack) = self.stack.as_mut() {
                    self.engine
                        .set_connection_trace(&mut stack.connection, self.settings.trace)?;
                }
            }
            debug!("Option {} set", name);
            return Ok(());
        }

        if let Some(stack) = self.stack.as_mut() {
            self.engine.set_io_option(&mut stack.tls_io, name, &value)?;
        }
        match self.io_options.iter_mut().find(|(n, _)| n == name) {
            Some(option) => option.1 = value,
            None => self.io_options.push((name.to_string(), value)),
        }
        debug!("TLS option {} stored", name);
        Ok(())
    }

    fn register(
        &mut self,
        device: &DeviceConfig,
        waiting_to_send: &WaitingList,
    ) -> crate::Result<DeviceHandle> {
        if device.device_id != self.device_id {
            return Err(IoTHubError::Registration(format!(
                "device `{}` does not match transport device `{}`",
                device.device_id, self.device_id
            )));
        }
        if device.device_key.is_some() && device.device_sas_token.is_some() {
            return Err(IoTHubError::Registration(
                "both a device key and a SAS token were given".to_string(),
            ));
        }
        if let (Some(key), Credential::DeviceKey(own)) = (&device.device_key, &self.credential) {
            if key != own {
                return Err(IoTHubError::Registration("device key mismatch".to_string()));
            }
        }
        if !waiting_to_send.ptr_eq(&self.waiting_to_send) {
            return Err(IoTHubError::Registration(
                "waiting list differs from the one the transport was created with".to_string(),
            ));
        }
        if self.registered {
            return Err(IoTHubError::Registration(format!(
                "device `{}` is already registered",
                self.device_id
            )));
        }

        self.registered = true;
        info!("Registered device {}", self.device_id);
        Ok(DeviceHandle::new(self.device_id.clone()))
    }

    fn unregister(&mut self, device: DeviceHandle) -> crate::Result<()> {
        if !self.registered || device.device_id() != self.device_id {
            return Err(IoTHubError::Registration(format!(
                "device `{}` is not registered",
                device.device_id()
            )));
        }
        self.registered = false;
        self.release_links();
        info!("Unregistered device {}", self.device_id);
        Ok(())
    }

    fn subscribe(&mut self) -> crate::Result<()> {
        self.subscribed = true;
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    fn do_work(&mut self, client: Option<&mut dyn ClientCallbacks>) {
        let Some(client) = client else {
            return;
        };
        if !self.registered {
            return;
        }

        if let Err(e) = self.tick(client) {
            error!("AMQP transport failure, reconnecting: {}", e);
            self.teardown();
        }
        self.expire_in_progress(client);
    }

    fn send_status(&self) -> SendStatus {
        if self.waiting_to_send.is_empty() && self.in_progress.is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        }
    }

    fn hostname(&self) -> &str {
        &self.addresses.fqdn
    }
}

impl<E: AmqpEngine, C: Clock> Drop for AmqpTransport<E, C> {
    fn drop(&mut self) {
        // Events in flight go back to the caller's list unconfirmed
        self.teardown();
    }
}

impl<E: AmqpEngine, C: Clock> std::fmt::Debug for AmqpTransport<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("devices_path", &self.addresses.devices_path)
            .field("status", &self.connection_status())
            .field("in_progress", &self.in_progress.len())
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}
