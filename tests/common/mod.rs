#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use azure_iot_amqp::amqp::{
    AmqpEngine, AmqpError, AmqpEvent, AmqpMessage, AmqpValue, DeliveryId, DeliveryOutcome,
    DeliveryTag, LinkConfig, LinkState, OperationResult, ReceiverSettleMode, Role,
    SaslMechanismKind, SendResult, TlsIoConfig,
};
use azure_iot_amqp::{
    AmqpTransport, ClientCallbacks, ClientConfig, Clock, ConfirmationResult, DeviceConfig,
    DeviceHandle, EventItem, Message, MessageDisposition, OptionValue, Transport, TransportConfig, WaitingList,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Calls the transport makes to build a connection, in order
pub const STACK_BUILD_CALLS: &[&str] = &[
    "default_tls_io_interface",
    "create_tls_io",
    "create_sasl_mechanism",
    "sasl_client_io_interface",
    "create_sasl_io",
    "create_connection",
    "create_session",
    "set_incoming_window",
    "set_outgoing_window",
    "create_cbs",
    "open_cbs",
];

pub const DEVICE_KEY: &str = "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=";
pub const DEVICE_ID: &str = "FirstDevice";
pub const DEVICES_PATH: &str = "myiothub.azure-devices.net/devices/FirstDevice";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub name: String,
    pub role: Role,
    pub source: String,
    pub target: String,
    pub max_message_size: Option<u64>,
    pub settle_mode: Option<ReceiverSettleMode>,
    pub attach_properties: Option<AmqpValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutToken {
    pub token_type: String,
    pub audience: String,
    pub token: String,
}

/// Everything the scripted engine saw and what it should do next
#[derive(Debug)]
pub struct MockState {
    pub calls: Vec<String>,
    pub destroyed: Vec<&'static str>,
    pub fail_on: HashSet<&'static str>,
    pub auto_complete_put_token: bool,
    pub auto_open_links: bool,
    pub auto_complete_sends: bool,
    pub pending_events: Vec<AmqpEvent>,
    pub tls_io_config: Option<(String, u16)>,
    pub connection_config: Option<(String, String)>,
    pub windows: (Option<u32>, Option<u32>),
    pub io_options: Vec<(String, OptionValue)>,
    pub trace: Vec<bool>,
    pub tokens: Vec<PutToken>,
    pub links: Vec<LinkRecord>,
    pub sent: Vec<(DeliveryTag, AmqpMessage)>,
    pub settled: Vec<(DeliveryId, DeliveryOutcome)>,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            calls: Vec::new(),
            destroyed: Vec::new(),
            fail_on: HashSet::new(),
            auto_complete_put_token: true,
            auto_open_links: true,
            auto_complete_sends: true,
            pending_events: Vec::new(),
            tls_io_config: None,
            connection_config: None,
            windows: (None, None),
            io_options: Vec::new(),
            trace: Vec::new(),
            tokens: Vec::new(),
            links: Vec::new(),
            sent: Vec::new(),
            settled: Vec::new(),
        }
    }
}

impl MockState {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn sent_bodies(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .map(|(_, m)| m.body_amqp_data(0).unwrap().to_vec())
            .collect()
    }
}

/// Engine object; dropping it records its destruction
#[derive(Debug)]
pub struct Handle {
    kind: &'static str,
    state: Rc<RefCell<MockState>>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.state.borrow_mut().destroyed.push(self.kind);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    pub state: Rc<RefCell<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn call(&self, name: &'static str) -> Result<(), AmqpError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(name.to_string());
        if state.fail_on.contains(name) {
            return Err(AmqpError::engine(name, "scripted failure"));
        }
        Ok(())
    }

    fn handle(&self, kind: &'static str) -> Handle {
        Handle {
            kind,
            state: self.state.clone(),
        }
    }

    fn push_event(&self, event: AmqpEvent) {
        self.state.borrow_mut().pending_events.push(event);
    }

    fn link_mut<R>(&self, link: &Handle, f: impl FnOnce(&mut LinkRecord) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let name = match link.kind {
            "sender_link" => "sender-link",
            _ => "receiver-link",
        };
        let record = state
            .links
            .iter_mut()
            .rev()
            .find(|l| l.name == name)
            .expect("link record");
        f(record)
    }
}

impl AmqpEngine for MockEngine {
    type IoInterface = &'static str;
    type Io = Handle;
    type SaslMechanism = Handle;
    type Connection = Handle;
    type Session = Handle;
    type Cbs = Handle;
    type Link = Handle;
    type Sender = Handle;
    type Receiver = Handle;

    fn default_tls_io_interface(&mut self) -> Result<Self::IoInterface, AmqpError> {
        self.call("default_tls_io_interface")?;
        Ok("tlsio")
    }

    fn create_tls_io(
        &mut self,
        interface: &Self::IoInterface,
        config: &TlsIoConfig<'_>,
    ) -> Result<Self::Io, AmqpError> {
        assert_eq!(*interface, "tlsio");
        self.call("create_tls_io")?;
        self.state.borrow_mut().tls_io_config = Some((config.hostname.to_string(), config.port));
        Ok(self.handle("tls_io"))
    }

    fn set_io_option(
        &mut self,
        _io: &mut Self::Io,
        name: &str,
        value: &OptionValue,
    ) -> Result<(), AmqpError> {
        self.call("set_io_option")?;
        self.state
            .borrow_mut()
            .io_options
            .push((name.to_string(), value.clone()));
        Ok(())
    }

    fn create_sasl_mechanism(
        &mut self,
        kind: SaslMechanismKind,
    ) -> Result<Self::SaslMechanism, AmqpError> {
        assert_eq!(kind, SaslMechanismKind::MsSbCbs);
        self.call("create_sasl_mechanism")?;
        Ok(self.handle("sasl_mechanism"))
    }

    fn sasl_client_io_interface(&mut self) -> Result<Self::IoInterface, AmqpError> {
        self.call("sasl_client_io_interface")?;
        Ok("saslclientio")
    }

    fn create_sasl_io(
        &mut self,
        interface: &Self::IoInterface,
        tls_io: &mut Self::Io,
        mechanism: &mut Self::SaslMechanism,
    ) -> Result<Self::Io, AmqpError> {
        assert_eq!(*interface, "saslclientio");
        assert_eq!(tls_io.kind, "tls_io");
        assert_eq!(mechanism.kind, "sasl_mechanism");
        self.call("create_sasl_io")?;
        Ok(self.handle("sasl_io"))
    }

    fn create_connection(
        &mut self,
        io: &mut Self::Io,
        hostname: &str,
        container_id: &str,
    ) -> Result<Self::Connection, AmqpError> {
        assert_eq!(io.kind, "sasl_io");
        self.call("create_connection")?;
        self.state.borrow_mut().connection_config =
            Some((hostname.to_string(), container_id.to_string()));
        Ok(self.handle("connection"))
    }

    fn set_connection_trace(
        &mut self,
        _connection: &mut Self::Connection,
        trace: bool,
    ) -> Result<(), AmqpError> {
        self.call("set_connection_trace")?;
        self.state.borrow_mut().trace.push(trace);
        Ok(())
    }

    fn create_session(
        &mut self,
        _connection: &mut Self::Connection,
    ) -> Result<Self::Session, AmqpError> {
        self.call("create_session")?;
        Ok(self.handle("session"))
    }

    fn set_incoming_window(
        &mut self,
        _session: &mut Self::Session,
        window: u32,
    ) -> Result<(), AmqpError> {
        self.call("set_incoming_window")?;
        self.state.borrow_mut().windows.0 = Some(window);
        Ok(())
    }

    fn set_outgoing_window(
        &mut self,
        _session: &mut Self::Session,
        window: u32,
    ) -> Result<(), AmqpError> {
        self.call("set_outgoing_window")?;
        self.state.borrow_mut().windows.1 = Some(window);
        Ok(())
    }

    fn create_cbs(&mut self, _session: &mut Self::Session) -> Result<Self::Cbs, AmqpError> {
        self.call("create_cbs")?;
        Ok(self.handle("cbs"))
    }

    fn open_cbs(&mut self, _cbs: &mut Self::Cbs) -> Result<(), AmqpError> {
        self.call("open_cbs")
    }

    fn put_token(
        &mut self,
        _cbs: &mut Self::Cbs,
        token_type: &str,
        audience: &str,
        token: &str,
    ) -> Result<(), AmqpError> {
        self.call("put_token")?;
        let auto = {
            let mut state = self.state.borrow_mut();
            state.tokens.push(PutToken {
                token_type: token_type.to_string(),
                audience: audience.to_string(),
                token: token.to_string(),
            });
            state.auto_complete_put_token
        };
        if auto {
            self.push_event(AmqpEvent::PutTokenComplete(OperationResult::Ok));
        }
        Ok(())
    }

    fn create_link(
        &mut self,
        _session: &mut Self::Session,
        config: &LinkConfig<'_>,
    ) -> Result<Self::Link, AmqpError> {
        self.call("create_link")?;
        self.state.borrow_mut().links.push(LinkRecord {
            name: config.name.to_string(),
            role: config.role,
            source: config.source.to_string(),
            target: config.target.to_string(),
            max_message_size: None,
            settle_mode: None,
            attach_properties: None,
        });
        Ok(self.handle(match config.role {
            Role::Sender => "sender_link",
            Role::Receiver => "receiver_link",
        }))
    }

    fn set_link_attach_properties(
        &mut self,
        link: &mut Self::Link,
        properties: &AmqpValue,
    ) -> Result<(), AmqpError> {
        self.call("set_link_attach_properties")?;
        self.link_mut(link, |l| l.attach_properties = Some(properties.clone()));
        Ok(())
    }

    fn set_link_max_message_size(
        &mut self,
        link: &mut Self::Link,
        size: u64,
    ) -> Result<(), AmqpError> {
        self.call("set_link_max_message_size")?;
        self.link_mut(link, |l| l.max_message_size = Some(size));
        Ok(())
    }

    fn set_link_receiver_settle_mode(
        &mut self,
        link: &mut Self::Link,
        mode: ReceiverSettleMode,
    ) -> Result<(), AmqpError> {
        self.call("set_link_receiver_settle_mode")?;
        self.link_mut(link, |l| l.settle_mode = Some(mode));
        Ok(())
    }

    fn create_sender(&mut self, _link: &mut Self::Link) -> Result<Self::Sender, AmqpError> {
        self.call("create_sender")?;
        Ok(self.handle("sender"))
    }

    fn open_sender(&mut self, _sender: &mut Self::Sender) -> Result<(), AmqpError> {
        self.call("open_sender")?;
        if self.state.borrow().auto_open_links {
            self.push_event(AmqpEvent::SenderStateChanged {
                new: LinkState::Open,
                previous: LinkState::Opening,
            });
        }
        Ok(())
    }

    fn send(
        &mut self,
        _sender: &mut Self::Sender,
        message: &AmqpMessage,
        tag: DeliveryTag,
    ) -> Result<(), AmqpError> {
        self.call("send")?;
        let auto = {
            let mut state = self.state.borrow_mut();
            state.sent.push((tag, message.clone()));
            state.auto_complete_sends
        };
        if auto {
            self.push_event(AmqpEvent::SendComplete {
                tag,
                result: SendResult::Ok,
            });
        }
        Ok(())
    }

    fn create_receiver(&mut self, _link: &mut Self::Link) -> Result<Self::Receiver, AmqpError> {
        self.call("create_receiver")?;
        Ok(self.handle("receiver"))
    }

    fn open_receiver(&mut self, _receiver: &mut Self::Receiver) -> Result<(), AmqpError> {
        self.call("open_receiver")?;
        if self.state.borrow().auto_open_links {
            self.push_event(AmqpEvent::ReceiverStateChanged {
                new: LinkState::Open,
                previous: LinkState::Opening,
            });
        }
        Ok(())
    }

    fn close_receiver(&mut self, _receiver: &mut Self::Receiver) -> Result<(), AmqpError> {
        self.call("close_receiver")
    }

    fn settle(
        &mut self,
        _receiver: &mut Self::Receiver,
        delivery: DeliveryId,
        outcome: DeliveryOutcome,
    ) -> Result<(), AmqpError> {
        self.call("settle")?;
        self.state.borrow_mut().settled.push((delivery, outcome));
        Ok(())
    }

    fn connection_do_work(&mut self, _connection: &mut Self::Connection) -> Vec<AmqpEvent> {
        let mut state = self.state.borrow_mut();
        state.calls.push("connection_do_work".to_string());
        std::mem::take(&mut state.pending_events)
    }
}

/// Clock moved by hand
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Rc::new(Cell::new(
                Utc.with_ymd_and_hms(2020, 4, 17, 10, 0, 0).unwrap(),
            )),
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.set(self.now.get() + Duration::milliseconds(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Upper layer recording what the transport hands it
#[derive(Debug)]
pub struct TestClient {
    pub received: Vec<Message>,
    pub disposition: MessageDisposition,
}

impl Default for TestClient {
    fn default() -> Self {
        TestClient {
            received: Vec::new(),
            disposition: MessageDisposition::Accepted,
        }
    }
}

impl ClientCallbacks for TestClient {
    fn message_received(&mut self, message: Message) -> MessageDisposition {
        self.received.push(message);
        self.disposition
    }
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        device_id: Some(DEVICE_ID.to_string()),
        device_key: Some(DEVICE_KEY.to_string()),
        device_sas_token: None,
        iot_hub_name: Some("myiothub".to_string()),
        iot_hub_suffix: Some("azure-devices.net".to_string()),
    }
}

pub fn device_config() -> DeviceConfig {
    DeviceConfig {
        device_id: DEVICE_ID.to_string(),
        device_key: Some(DEVICE_KEY.to_string()),
        device_sas_token: None,
    }
}

pub struct Harness {
    pub transport: AmqpTransport<MockEngine, ManualClock>,
    pub state: Rc<RefCell<MockState>>,
    pub clock: ManualClock,
    pub waiting: WaitingList,
    pub client: TestClient,
    pub confirmations: Rc<RefCell<Vec<(usize, ConfirmationResult)>>>,
    pub device: Option<DeviceHandle>,
}

impl Harness {
    /// A transport with the test device registered
    pub fn new() -> Self {
        Self::with_config(client_config())
    }

    pub fn with_config(upper: ClientConfig) -> Self {
        init_logger();
        let engine = MockEngine::new();
        let state = engine.state.clone();
        let clock = ManualClock::new();
        let waiting = WaitingList::new();
        let mut transport = AmqpTransport::create_with_clock(
            engine,
            TransportConfig {
                upper_config: Some(upper.clone()),
                waiting_to_send: Some(waiting.clone()),
            },
            clock.clone(),
        )
        .unwrap();
        let device = transport.register(&upper.device(), &waiting).unwrap();

        Harness {
            transport,
            state,
            clock,
            waiting,
            client: TestClient::default(),
            confirmations: Rc::new(RefCell::new(Vec::new())),
            device: Some(device),
        }
    }

    pub fn do_work(&mut self) {
        let client: &mut dyn ClientCallbacks = &mut self.client;
        self.transport.do_work(Some(client));
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.do_work();
        }
    }

    /// Queue an event whose confirmation is recorded under `context`
    pub fn queue(&self, context: usize, message: Message) {
        let confirmations = self.confirmations.clone();
        self.waiting.push(EventItem::with_callback(message, move |result| {
            confirmations.borrow_mut().push((context, result));
        }));
    }

    pub fn confirmed(&self) -> Vec<(usize, ConfirmationResult)> {
        self.confirmations.borrow().clone()
    }

    /// Tick until the sender is open, the engine then expects sends
    pub fn open(&mut self) {
        // connect and put token, then open the sender
        self.ticks(2);
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn deliver(&self, delivery: u64, message: AmqpMessage) {
        self.state
            .borrow_mut()
            .pending_events
            .push(AmqpEvent::MessageReceived {
                delivery: DeliveryId(delivery),
                message,
            });
    }
}
