use super::{AmqpError, AmqpValue};

/// Descriptor code of the application-properties section
const APPLICATION_PROPERTIES_DESCRIPTOR: u64 = 0x74;

/// Kind of body an AMQP message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    ///
    None,
    /// One or more binary data sections
    Data,
    /// A single AMQP value
    Value,
    /// One or more AMQP sequences
    Sequence,
}

/// Body of an AMQP message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageBodySection {
    ///
    #[default]
    None,
    ///
    Data(Vec<Vec<u8>>),
    ///
    Value(AmqpValue),
    ///
    Sequence(Vec<Vec<AmqpValue>>),
}

/// The immutable properties section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    ///
    pub message_id: Option<AmqpValue>,
    ///
    pub correlation_id: Option<AmqpValue>,
}

/// An AMQP 1.0 message as handed to and received from the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpMessage {
    body: MessageBodySection,
    properties: Option<Properties>,
    application_properties: Option<AmqpValue>,
}

impl AmqpMessage {
    ///
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binary data section
    pub fn add_body_amqp_data(&mut self, data: impl Into<Vec<u8>>) -> Result<(), AmqpError> {
        match &mut self.body {
            MessageBodySection::None => {
                self.body = MessageBodySection::Data(vec![data.into()]);
                Ok(())
            }
            MessageBodySection::Data(sections) => {
                sections.push(data.into());
                Ok(())
            }
            _ => Err(AmqpError::TypeMismatch {
                expected: "data body",
                found: "value or sequence body",
            }),
        }
    }

    /// Replace the body with a single AMQP value
    pub fn set_body_amqp_value(&mut self, value: AmqpValue) {
        self.body = MessageBodySection::Value(value);
    }

    ///
    pub fn body(&self) -> &MessageBodySection {
        &self.body
    }

    ///
    pub fn body_type(&self) -> BodyType {
        match self.body {
            MessageBodySection::None => BodyType::None,
            MessageBodySection::Data(_) => BodyType::Data,
            MessageBodySection::Value(_) => BodyType::Value,
            MessageBodySection::Sequence(_) => BodyType::Sequence,
        }
    }

    /// Number of binary data sections
    pub fn body_amqp_data_count(&self) -> usize {
        match &self.body {
            MessageBodySection::Data(sections) => sections.len(),
            _ => 0,
        }
    }

    /// Bytes of the `index`th data section
    pub fn body_amqp_data(&self, index: usize) -> Result<&[u8], AmqpError> {
        let MessageBodySection::Data(sections) = &self.body else {
            return Err(AmqpError::TypeMismatch {
                expected: "data body",
                found: "other body",
            });
        };
        sections
            .get(index)
            .map(Vec::as_slice)
            .ok_or(AmqpError::OutOfRange {
                index,
                len: sections.len(),
            })
    }

    ///
    pub fn properties(&self) -> Option<&Properties> {
        self.properties.as_ref()
    }

    ///
    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = Some(properties);
    }

    /// Application properties as carried on the wire, a described map
    pub fn application_properties(&self) -> Option<&AmqpValue> {
        self.application_properties.as_ref()
    }

    /// Set the application properties from a map value
    pub fn set_application_properties(&mut self, map: AmqpValue) -> Result<(), AmqpError> {
        if !matches!(map, AmqpValue::Map(_)) {
            return Err(AmqpError::TypeMismatch {
                expected: "map",
                found: map.type_name(),
            });
        }
        self.application_properties = Some(AmqpValue::described(
            AmqpValue::ULong(APPLICATION_PROPERTIES_DESCRIPTOR),
            map,
        ));
        Ok(())
    }

    /// Set the application-properties section to an already encoded value
    pub fn set_application_properties_section(&mut self, section: AmqpValue) {
        self.application_properties = Some(section);
    }
}
