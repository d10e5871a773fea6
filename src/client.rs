use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::amqp::AmqpEngine;
use crate::amqp_transport::AmqpTransport;
use crate::config::{ClientConfig, OptionValue, TransportConfig};
use crate::error::IoTHubError;
use crate::message::{ConfirmationResult, Message, MessageDisposition};
use crate::queue::{EventItem, WaitingList};
use crate::transport::{ClientCallbacks, DeviceHandle, SendStatus, Transport};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Where cloud-to-device messages go
enum Inbox {
    None,
    Callback(Box<dyn FnMut(Message) -> MessageDisposition>),
    Channel(mpsc::Sender<Message>),
}

impl ClientCallbacks for Inbox {
    fn message_received(&mut self, message: Message) -> MessageDisposition {
        match self {
            // Nobody listens, let the hub redeliver later
            Inbox::None => MessageDisposition::Abandoned,
            Inbox::Callback(callback) => callback(message),
            Inbox::Channel(tx) => match tx.try_send(message) {
                Ok(()) => MessageDisposition::Accepted,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Message channel full, abandoning cloud to device message");
                    MessageDisposition::Abandoned
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("Message channel closed, rejecting cloud to device message");
                    MessageDisposition::Rejected
                }
            },
        }
    }
}

/// Client for communicating with IoT hub
///
/// Drives a polling [`Transport`] from a tokio task. The client is not `Send`,
/// use it from a current-thread runtime or a `LocalSet`.
pub struct IoTHubClient<T: Transport> {
    transport: T,
    waiting_to_send: WaitingList,
    device: Option<DeviceHandle>,
    inbox: Inbox,
    poll_interval: Duration,
}

impl<T: Transport> std::fmt::Debug for IoTHubClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoTHubClient")
            .field("device", &self.device)
            .field("waiting_to_send", &self.waiting_to_send)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<E: AmqpEngine> IoTHubClient<AmqpTransport<E>> {
    /// Create a client over AMQP from a device connection string
    ///
    /// # Example
    /// ```ignore
    /// use azure_iot_amqp::{IoTHubClient, Message};
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() -> azure_iot_amqp::Result<()> {
    ///     let mut client = IoTHubClient::from_connection_string(
    ///         MyEngine::new(),
    ///         "HostName=iothubname.azure-devices.net;DeviceId=MyDeviceId;SharedAccessKey=TheAccessKey",
    ///     )?;
    ///
    ///     let msg = Message::builder()
    ///         .set_body(b"{\"temperature\": 21.5}".to_vec())
    ///         .set_message_id("1-t")
    ///         .build()?;
    ///
    ///     client.send_message(msg).await
    /// }
    /// ```
    pub fn from_connection_string(engine: E, connection_string: &str) -> crate::Result<Self> {
        let upper = ClientConfig::from_connection_string(connection_string)?;
        let device = upper.device();
        let waiting_to_send = WaitingList::new();
        let transport = AmqpTransport::create(
            engine,
            TransportConfig {
                upper_config: Some(upper),
                waiting_to_send: Some(waiting_to_send.clone()),
            },
        )?;

        let mut client = IoTHubClient::new(transport, waiting_to_send);
        client.register(&device)?;
        Ok(client)
    }
}

impl<T: Transport> IoTHubClient<T> {
    /// Wrap a transport created with `waiting_to_send` as its queue
    pub fn new(transport: T, waiting_to_send: WaitingList) -> Self {
        IoTHubClient {
            transport,
            waiting_to_send,
            device: None,
            inbox: Inbox::None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often the async methods drive the transport
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Bind the device to the transport
    pub fn register(&mut self, device: &crate::config::DeviceConfig) -> crate::Result<()> {
        let handle = self.transport.register(device, &self.waiting_to_send)?;
        self.device = Some(handle);
        Ok(())
    }

    /// Release the device from the transport
    pub fn unregister(&mut self) -> crate::Result<()> {
        match self.device.take() {
            Some(handle) => self.transport.unregister(handle),
            None => Err(IoTHubError::Registration("no device registered".to_string())),
        }
    }

    ///
    pub fn transport(&self) -> &T {
        &self.transport
    }

    ///
    pub fn set_option(&mut self, name: &str, value: OptionValue) -> crate::Result<()> {
        self.transport.set_option(name, value)
    }

    /// Queue an event, its confirmation arrives on the returned receiver
    pub fn send_event(&mut self, message: Message) -> oneshot::Receiver<ConfirmationResult> {
        let (tx, rx) = oneshot::channel();
        self.waiting_to_send
            .push(EventItem::with_callback(message, move |result| {
                let _ = tx.send(result);
            }));
        rx
    }

    /// Send a device to cloud message and wait until the hub confirms it
    pub async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        let mut confirmation = self.send_event(message);
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.do_work();

            match confirmation.try_recv() {
                Ok(ConfirmationResult::Ok) => return Ok(()),
                Ok(ConfirmationResult::Error) => return Err(IoTHubError::SendFailed),
                Err(oneshot::error::TryRecvError::Empty) => continue,
                Err(oneshot::error::TryRecvError::Closed) => return Err(IoTHubError::SendFailed),
            }
        }
    }

    /// Handle cloud to device messages with `callback`
    pub fn set_message_callback<F>(&mut self, callback: F) -> crate::Result<()>
    where
        F: FnMut(Message) -> MessageDisposition + 'static,
    {
        self.transport.subscribe()?;
        self.inbox = Inbox::Callback(Box::new(callback));
        Ok(())
    }

    /// Receive cloud to device messages on a channel
    ///
    /// Messages arriving while the channel is full are abandoned, the hub
    /// delivers them again later. A `capacity` of zero is treated as one.
    pub fn get_receiver(&mut self, capacity: usize) -> crate::Result<mpsc::Receiver<Message>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.transport.subscribe()?;
        self.inbox = Inbox::Channel(tx);
        Ok(rx)
    }

    /// Stop receiving cloud to device messages
    pub fn stop_receiving(&mut self) {
        self.transport.unsubscribe();
        self.inbox = Inbox::None;
    }

    /// Advance the transport once
    pub fn do_work(&mut self) {
        let inbox: &mut dyn ClientCallbacks = &mut self.inbox;
        self.transport.do_work(Some(inbox));
    }

    /// Drive the transport until every queued event is confirmed
    pub async fn run_until_idle(&mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            self.do_work();
            if self.send_status() == SendStatus::Idle {
                return;
            }
        }
    }

    ///
    pub fn send_status(&self) -> SendStatus {
        self.transport.send_status()
    }
}
