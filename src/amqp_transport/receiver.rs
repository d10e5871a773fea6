use super::{client_version_properties, Addresses, TickError};
use crate::amqp::{
    AmqpEngine, AmqpError, AmqpMessage, AmqpValue, BodyType, DeliveryOutcome, LinkConfig,
    LinkState, ReceiverSettleMode, Role,
};
use crate::config::{RECEIVER_LINK_NAME, RECEIVER_MAX_MESSAGE_SIZE, RECEIVER_TARGET};
use crate::error::IoTHubError;
use crate::message::{Message, MessageDisposition};

/// Link and message receiver for cloud-to-device messages
pub(crate) struct MessageReceiver<E: AmqpEngine> {
    pub(crate) receiver: E::Receiver,
    _link: E::Link,
    state: LinkState,
}

impl<E: AmqpEngine> MessageReceiver<E> {
    /// Attach the devicebound link and start opening its receiver
    pub(crate) fn create(
        engine: &mut E,
        session: &mut E::Session,
        addresses: &Addresses,
    ) -> Result<Self, AmqpError> {
        let mut link = engine.create_link(
            session,
            &LinkConfig {
                name: RECEIVER_LINK_NAME,
                role: Role::Receiver,
                source: &addresses.receive_source,
                target: RECEIVER_TARGET,
            },
        )?;
        engine.set_link_receiver_settle_mode(&mut link, ReceiverSettleMode::First)?;
        engine.set_link_max_message_size(&mut link, RECEIVER_MAX_MESSAGE_SIZE)?;
        engine.set_link_attach_properties(&mut link, &client_version_properties()?)?;

        let mut receiver = engine.create_receiver(&mut link)?;
        engine.open_receiver(&mut receiver)?;

        debug!("Receiver link from {} opening", addresses.receive_source);
        Ok(MessageReceiver {
            receiver,
            _link: link,
            state: LinkState::Opening,
        })
    }

    /// Close the receiver and release the link
    pub(crate) fn close(mut self, engine: &mut E) {
        if let Err(e) = engine.close_receiver(&mut self.receiver) {
            warn!("Failed closing message receiver: {}", e);
        }
    }

    /// Track the link state, entering `Error` fails the tick once
    pub(crate) fn on_state_changed(
        &mut self,
        new: LinkState,
        previous: LinkState,
    ) -> Result<(), TickError> {
        trace!("Receiver state {:?} -> {:?}", previous, new);
        self.state = new;
        if new == LinkState::Error && previous != LinkState::Error {
            return Err(TickError::LinkError("receiver"));
        }
        Ok(())
    }
}

/// Outcome for a delivery that could not be turned into a device message
pub(crate) fn read_failure_outcome() -> DeliveryOutcome {
    DeliveryOutcome::Rejected {
        condition: "Rejected due to failure reading AMQP message".to_string(),
        description: "Failed reading AMQP message".to_string(),
    }
}

/// Outcome reported to the hub for the application's disposition
pub(crate) fn disposition_outcome(disposition: MessageDisposition) -> DeliveryOutcome {
    match disposition {
        MessageDisposition::Accepted => DeliveryOutcome::Accepted,
        MessageDisposition::Abandoned => DeliveryOutcome::Released,
        MessageDisposition::Rejected => DeliveryOutcome::Rejected {
            condition: "Rejected by application".to_string(),
            description: "Rejected by application".to_string(),
        },
    }
}

fn optional_string(value: Option<&AmqpValue>) -> Result<Option<&str>, AmqpError> {
    match value {
        None | Some(AmqpValue::Null) => Ok(None),
        Some(value) => value.as_str().map(Some),
    }
}

/// Convert a delivery into a device message
pub(crate) fn to_device_message(amqp: &AmqpMessage) -> Result<Message, IoTHubError> {
    if amqp.body_type() != BodyType::Data {
        return Err(AmqpError::TypeMismatch {
            expected: "data body",
            found: "other body",
        }
        .into());
    }
    let mut message = Message::new(amqp.body_amqp_data(0)?.to_vec());

    if let Some(properties) = amqp.properties() {
        if let Some(message_id) = optional_string(properties.message_id.as_ref())? {
            message.set_message_id(message_id);
        }
        if let Some(correlation_id) = optional_string(properties.correlation_id.as_ref())? {
            message.set_correlation_id(correlation_id);
        }
    }

    // Absent application properties are fine, unreadable ones fail the message
    if let Some(section) = amqp.application_properties() {
        let map = section.inplace_described_value()?;
        let count = map.map_pair_count()?;
        for i in 0..count {
            let (key, value) = map.map_key_value_pair(i)?;
            message
                .properties_mut()
                .add_or_update(key.as_str()?, value.as_str()?)?;
        }
    }

    Ok(message)
}
