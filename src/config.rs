use serde::Deserialize;
use thiserror::Error;

use crate::error::IoTHubError;
use crate::queue::WaitingList;
use crate::token::{parse_connection_string, TokenError};

/// Secure AMQP port of the hub
pub const AMQP_PORT: u16 = 5671;
/// Container id announced when opening the AMQP connection
pub const CONTAINER_ID: &str = "default_container_id";
/// Token type handed to the CBS node with every put-token
pub const CBS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";
/// Session incoming window
pub const INCOMING_WINDOW: u32 = u32::MAX;
/// Session outgoing window
pub const OUTGOING_WINDOW: u32 = 100;
/// Source address of the event sender link
pub const SENDER_SOURCE: &str = "ingress";
///
pub const SENDER_LINK_NAME: &str = "sender-link";
/// Largest event the sender link accepts
pub const SENDER_MAX_MESSAGE_SIZE: u64 = u64::MAX;
/// Target address of the message receiver link
pub const RECEIVER_TARGET: &str = "ingress-rx";
///
pub const RECEIVER_LINK_NAME: &str = "receiver-link";
/// Largest cloud-to-device message the receiver link accepts
pub const RECEIVER_MAX_MESSAGE_SIZE: u64 = 65536;
/// Attach property identifying the client library to the hub
pub const CLIENT_VERSION_PROPERTY: &str = "com.microsoft:client-version";

const MAX_DEVICE_ID_LENGTH: usize = 128;
const MAX_HOSTNAME_LENGTH: usize = 254;

/// Lifetime of issued SAS tokens, in milliseconds
pub const OPTION_SAS_TOKEN_LIFETIME: &str = "sas_token_lifetime";
/// Age after which an issued token is replaced, in milliseconds
pub const OPTION_SAS_TOKEN_REFRESH_TIME: &str = "sas_token_refresh_time";
/// How long a put-token may stay unanswered, in milliseconds
pub const OPTION_CBS_REQUEST_TIMEOUT: &str = "cbs_request_timeout";
/// How long an event may wait for its send confirmation, in milliseconds
pub const OPTION_MESSAGE_SEND_TIMEOUT: &str = "message_send_timeout";
/// Turns AMQP frame tracing on the connection on or off
pub const OPTION_LOG_TRACE: &str = "logtrace";

/// Error related to building the transport configuration
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Uninitialized field
    #[error("{0} must be initialized")]
    UninitializedField(&'static str),
    /// Custom validation error
    #[error("{0} failed to validate")]
    ValidationError(&'static str),
}

/// Device and hub details supplied by the client layer
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    ///
    pub device_id: Option<String>,
    /// Base64 shared access key of the device
    pub device_key: Option<String>,
    /// Pre-made SAS token, used instead of a device key
    pub device_sas_token: Option<String>,
    /// First label of the hub host name
    pub iot_hub_name: Option<String>,
    /// Remainder of the hub host name, e.g. `azure-devices.net`
    pub iot_hub_suffix: Option<String>,
}

impl ClientConfig {
    /// Read the hub and device details from a device connection string
    pub fn from_connection_string(connection_string: &str) -> Result<Self, TokenError> {
        let cs = parse_connection_string(connection_string)?;
        Ok(ClientConfig {
            device_id: Some(cs.device_id),
            device_key: cs.device_key,
            device_sas_token: cs.device_sas_token,
            iot_hub_name: Some(cs.iot_hub_name),
            iot_hub_suffix: Some(cs.iot_hub_suffix),
        })
    }

    /// The device identity to register with a transport created from this config
    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            device_id: self.device_id.clone().unwrap_or_default(),
            device_key: self.device_key.clone(),
            device_sas_token: self.device_sas_token.clone(),
        }
    }
}

/// Everything a transport is created from
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    ///
    pub upper_config: Option<ClientConfig>,
    /// Caller-owned queue of events to send
    pub waiting_to_send: Option<WaitingList>,
}

/// Identity bound to a transport by `register`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    ///
    pub device_id: String,
    ///
    pub device_key: Option<String>,
    ///
    pub device_sas_token: Option<String>,
}

/// The credential a validated configuration carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Credential {
    DeviceKey(String),
    SasToken(String),
}

/// A configuration that passed create-time validation
#[derive(Debug)]
pub(crate) struct ValidatedConfig {
    pub(crate) device_id: String,
    pub(crate) credential: Credential,
    pub(crate) iot_hub_name: String,
    pub(crate) iot_hub_suffix: String,
    pub(crate) waiting_to_send: WaitingList,
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ConfigError> {
    match value.as_deref() {
        None => Err(ConfigError::UninitializedField(field)),
        Some("") => Err(ConfigError::ValidationError(field)),
        Some(value) => Ok(value),
    }
}

impl TransportConfig {
    /// Check every field a transport needs and take ownership of them
    pub(crate) fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let Some(upper) = self.upper_config else {
            return Err(ConfigError::UninitializedField("upper_config"));
        };
        let Some(waiting_to_send) = self.waiting_to_send else {
            return Err(ConfigError::UninitializedField("waiting_to_send"));
        };

        let device_id = required(&upper.device_id, "device_id")?;
        if device_id.len() > MAX_DEVICE_ID_LENGTH {
            return Err(ConfigError::ValidationError("device_id"));
        }

        let credential = match (&upper.device_key, &upper.device_sas_token) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "Exactly one of `device_key` or `device_sas_token`",
                ))
            }
            (None, None) => {
                return Err(ConfigError::UninitializedField(
                    "device_key or device_sas_token",
                ))
            }
            (Some(_), None) => {
                Credential::DeviceKey(required(&upper.device_key, "device_key")?.to_string())
            }
            (None, Some(_)) => Credential::SasToken(
                required(&upper.device_sas_token, "device_sas_token")?.to_string(),
            ),
        };

        let iot_hub_name = required(&upper.iot_hub_name, "iot_hub_name")?;
        let iot_hub_suffix = required(&upper.iot_hub_suffix, "iot_hub_suffix")?;
        if iot_hub_name.len() + iot_hub_suffix.len() > MAX_HOSTNAME_LENGTH {
            return Err(ConfigError::ValidationError("iot_hub_name and iot_hub_suffix"));
        }

        Ok(ValidatedConfig {
            device_id: device_id.to_string(),
            credential,
            iot_hub_name: iot_hub_name.to_string(),
            iot_hub_suffix: iot_hub_suffix.to_string(),
            waiting_to_send,
        })
    }
}

/// Value passed to `set_option`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Durations in milliseconds and other counts
    Number(u64),
    ///
    Bool(bool),
    ///
    Text(String),
    /// Opaque data such as certificates for the TLS layer
    Bytes(Vec<u8>),
}

/// Tunable timings of the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Lifetime of each issued SAS token, in milliseconds
    pub sas_token_lifetime: u64,
    /// Age of a token after which a new one is put, in milliseconds
    pub sas_token_refresh_time: u64,
    /// Time a put-token may stay unanswered before reconnecting, in milliseconds
    pub cbs_request_timeout: u64,
    /// Time an event may wait for its confirmation, in milliseconds. Zero never expires.
    pub message_send_timeout: u64,
    /// Frame tracing on the AMQP connection
    pub trace: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let sas_token_lifetime = 3_600_000;
        TransportSettings {
            sas_token_lifetime,
            sas_token_refresh_time: sas_token_lifetime / 2,
            cbs_request_timeout: 30_000,
            message_send_timeout: 300_000,
            trace: false,
        }
    }
}

impl TransportSettings {
    /// Apply a recognised option, returning `false` for names meant for the TLS layer
    pub(crate) fn apply(&mut self, name: &str, value: &OptionValue) -> Result<bool, IoTHubError> {
        let field = match name {
            OPTION_SAS_TOKEN_LIFETIME => &mut self.sas_token_lifetime,
            OPTION_SAS_TOKEN_REFRESH_TIME => &mut self.sas_token_refresh_time,
            OPTION_CBS_REQUEST_TIMEOUT => &mut self.cbs_request_timeout,
            OPTION_MESSAGE_SEND_TIMEOUT => &mut self.message_send_timeout,
            OPTION_LOG_TRACE => {
                let OptionValue::Bool(trace) = value else {
                    return Err(IoTHubError::InvalidOption(name.to_string()));
                };
                self.trace = *trace;
                return Ok(true);
            }
            _ => return Ok(false),
        };

        let OptionValue::Number(ms) = value else {
            return Err(IoTHubError::InvalidOption(name.to_string()));
        };
        *field = *ms;
        Ok(true)
    }
}
