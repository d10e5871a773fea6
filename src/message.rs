use thiserror::Error;

/// Errors building a device message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Property keys and values are limited to printable US-ASCII
    #[error("message property `{0}` contains characters outside printable ASCII")]
    InvalidPropertyCharacters(String),
    /// The builder was never given a body
    #[error("message has no body")]
    MissingBody,
    /// Text bodies are sent as a single data section and must not be empty
    #[error("text message body is empty")]
    EmptyTextBody,
}

/// How the message body was supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ///
    ByteArray,
    ///
    String,
}

/// Body of a device message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Raw bytes
    Binary(Vec<u8>),
    /// UTF-8 text
    Text(String),
}

impl MessageBody {
    /// Bytes of the body, regardless of how it was supplied
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessageBody::Binary(bytes) => bytes,
            MessageBody::Text(text) => text.as_bytes(),
        }
    }
}

/// Application properties of a message, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    entries: Vec<(String, String)>,
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (b' '..=b'~').contains(&b))
}

impl MessageProperties {
    /// Insert a property, replacing the value when the key is already present
    pub fn add_or_update(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MessageError> {
        let key = key.into();
        let value = value.into();
        if !is_printable_ascii(&key) || !is_printable_ascii(&value) {
            return Err(MessageError::InvalidPropertyCharacters(key));
        }

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Key/value pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    ///
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Message used in body of communication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: MessageBody,
    message_id: Option<String>,
    correlation_id: Option<String>,
    properties: MessageProperties,
}

impl Message {
    /// Create with contents of body as message bytes
    pub fn new(body: Vec<u8>) -> Self {
        Self::with_body(MessageBody::Binary(body))
    }

    /// Create with a text body
    pub fn from_text(body: impl Into<String>) -> Self {
        Self::with_body(MessageBody::Text(body.into()))
    }

    fn with_body(body: MessageBody) -> Self {
        Self {
            body,
            message_id: None,
            correlation_id: None,
            properties: MessageProperties::default(),
        }
    }

    /// Get a builder instance for building up a message
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    ///
    pub fn content_type(&self) -> ContentType {
        match self.body {
            MessageBody::Binary(_) => ContentType::ByteArray,
            MessageBody::Text(_) => ContentType::String,
        }
    }

    ///
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Body as bytes, for either content type
    pub fn bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    /// Body as text, only for string messages
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Binary(_) => None,
        }
    }

    ///
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    ///
    pub fn set_message_id(&mut self, message_id: impl Into<String>) {
        self.message_id = Some(message_id.into());
    }

    ///
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    ///
    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.correlation_id = Some(correlation_id.into());
    }

    /// Application properties
    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    ///
    pub fn properties_mut(&mut self) -> &mut MessageProperties {
        &mut self.properties
    }
}

/// Builder for constructing Message instances
#[derive(Debug, Default)]
pub struct MessageBuilder {
    body: Option<MessageBody>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    properties: Vec<(String, String)>,
}

impl MessageBuilder {
    /// Set the message body
    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(MessageBody::Binary(body));
        self
    }

    /// Set a text body
    pub fn set_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(MessageBody::Text(body.into()));
        self
    }

    /// Set the identifier for this message
    pub fn set_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the identifier of the message this one relates to
    pub fn set_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a message property
    pub fn add_message_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Build into a message instance
    pub fn build(self) -> Result<Message, MessageError> {
        let body = self.body.ok_or(MessageError::MissingBody)?;
        let mut message = Message::with_body(body);
        message.message_id = self.message_id;
        message.correlation_id = self.correlation_id;
        for (key, value) in self.properties {
            message.properties.add_or_update(key, value)?;
        }
        Ok(message)
    }
}

/// What the application decided to do with a cloud-to-device message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Processed, the hub removes it
    Accepted,
    /// Dead-lettered by the hub
    Rejected,
    /// Put back on the hub queue for redelivery
    Abandoned,
}

/// Outcome reported to the sender of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// The hub accepted the event
    Ok,
    /// The event could not be delivered
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message() {
        let message = Message::builder()
            .set_body(b"{\"temperature\": 21.5}".to_vec())
            .set_message_id("mid-1")
            .add_message_property("alert", "false")
            .add_message_property("level", "info")
            .build()
            .unwrap();

        assert_eq!(message.content_type(), ContentType::ByteArray);
        assert_eq!(message.message_id(), Some("mid-1"));
        assert_eq!(message.correlation_id(), None);
        let props: Vec<_> = message.properties().iter().collect();
        assert_eq!(props, vec![("alert", "false"), ("level", "info")]);
    }

    #[test]
    fn build_requires_body() {
        assert_eq!(Message::builder().build(), Err(MessageError::MissingBody));
    }

    #[test]
    fn property_update_keeps_position() {
        let mut props = MessageProperties::default();
        props.add_or_update("a", "1").unwrap();
        props.add_or_update("b", "2").unwrap();
        props.add_or_update("a", "3").unwrap();
        assert_eq!(props.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
        assert_eq!(props.get("a"), Some("3"));
    }

    #[test]
    fn non_printable_properties_rejected() {
        let mut props = MessageProperties::default();
        assert!(props.add_or_update("tab\tkey", "v").is_err());
        assert!(props.add_or_update("key", "caf\u{e9}").is_err());
        assert!(props.add_or_update("key", "line\n").is_err());
        assert!(props.is_empty());
    }

    #[test]
    fn text_message_bytes() {
        let message = Message::from_text("hello");
        assert_eq!(message.content_type(), ContentType::String);
        assert_eq!(message.bytes(), b"hello");
        assert_eq!(message.text(), Some("hello"));
    }
}
