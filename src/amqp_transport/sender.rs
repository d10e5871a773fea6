use super::{client_version_properties, Addresses, TickError};
use crate::amqp::{
    AmqpEngine, AmqpError, AmqpMessage, AmqpValue, LinkConfig, LinkState, Properties, Role,
};
use crate::config::{SENDER_LINK_NAME, SENDER_MAX_MESSAGE_SIZE, SENDER_SOURCE};
use crate::error::IoTHubError;
use crate::message::{Message, MessageBody, MessageError};

/// Link and message sender carrying device-to-cloud events
pub(crate) struct EventSender<E: AmqpEngine> {
    pub(crate) sender: E::Sender,
    _link: E::Link,
    state: LinkState,
}

impl<E: AmqpEngine> EventSender<E> {
    /// Attach the events link and start opening its sender
    pub(crate) fn create(
        engine: &mut E,
        session: &mut E::Session,
        addresses: &Addresses,
    ) -> Result<Self, AmqpError> {
        let mut link = engine.create_link(
            session,
            &LinkConfig {
                name: SENDER_LINK_NAME,
                role: Role::Sender,
                source: SENDER_SOURCE,
                target: &addresses.send_target,
            },
        )?;
        engine.set_link_max_message_size(&mut link, SENDER_MAX_MESSAGE_SIZE)?;
        engine.set_link_attach_properties(&mut link, &client_version_properties()?)?;

        let mut sender = engine.create_sender(&mut link)?;
        engine.open_sender(&mut sender)?;

        debug!("Sender link to {} opening", addresses.send_target);
        Ok(EventSender {
            sender,
            _link: link,
            state: LinkState::Opening,
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Track the link state, entering `Error` fails the tick once
    pub(crate) fn on_state_changed(
        &mut self,
        new: LinkState,
        previous: LinkState,
    ) -> Result<(), TickError> {
        trace!("Sender state {:?} -> {:?}", previous, new);
        self.state = new;
        if new == LinkState::Error && previous != LinkState::Error {
            return Err(TickError::LinkError("sender"));
        }
        Ok(())
    }
}

/// Convert a queued event into the AMQP message put on the wire
pub(crate) fn to_amqp_message(message: &Message) -> Result<AmqpMessage, IoTHubError> {
    let bytes = match message.body() {
        MessageBody::Binary(bytes) => bytes.as_slice(),
        MessageBody::Text(text) if text.is_empty() => {
            return Err(MessageError::EmptyTextBody.into())
        }
        MessageBody::Text(text) => text.as_bytes(),
    };

    let mut amqp = AmqpMessage::new();
    amqp.add_body_amqp_data(bytes)?;

    if message.message_id().is_some() || message.correlation_id().is_some() {
        amqp.set_properties(Properties {
            message_id: message.message_id().map(AmqpValue::string),
            correlation_id: message.correlation_id().map(AmqpValue::string),
        });
    }

    if !message.properties().is_empty() {
        let mut map = AmqpValue::map();
        for (key, value) in message.properties().iter() {
            map.set_map_value(AmqpValue::symbol(key)?, AmqpValue::string(value))?;
        }
        amqp.set_application_properties(map)?;
    }

    Ok(amqp)
}
