use crate::config::{DeviceConfig, OptionValue};
use crate::message::{ConfirmationResult, Message, MessageDisposition};
use crate::queue::{EventItem, WaitingList};

/// Whether a transport still holds events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Nothing waiting and nothing in flight
    Idle,
    ///
    Busy,
}

/// A device bound to a transport by [`Transport::register`]
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle {
    device_id: String,
}

impl DeviceHandle {
    pub(crate) fn new(device_id: impl Into<String>) -> Self {
        DeviceHandle {
            device_id: device_id.into(),
        }
    }

    ///
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// The client layer a transport reports to while doing work
pub trait ClientCallbacks {
    /// An event reached a terminal state
    fn send_complete(&mut self, item: EventItem, result: ConfirmationResult) {
        item.confirm(result);
    }

    /// A cloud-to-device message arrived
    fn message_received(&mut self, message: Message) -> MessageDisposition;
}

/// Provider surface of a device transport
pub trait Transport {
    /// Apply a named option
    fn set_option(&mut self, name: &str, value: OptionValue) -> crate::Result<()>;
    /// Bind the device the transport was created for
    fn register(
        &mut self,
        device: &DeviceConfig,
        waiting_to_send: &WaitingList,
    ) -> crate::Result<DeviceHandle>;
    ///
    fn unregister(&mut self, device: DeviceHandle) -> crate::Result<()>;
    /// Start receiving cloud-to-device messages
    fn subscribe(&mut self) -> crate::Result<()>;
    ///
    fn unsubscribe(&mut self);
    /// Advance the transport by one step, a no-op without a client
    fn do_work(&mut self, client: Option<&mut dyn ClientCallbacks>);
    ///
    fn send_status(&self) -> SendStatus;
    /// Fully qualified host name of the hub
    fn hostname(&self) -> &str;
}
