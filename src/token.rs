use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

const DEVICEID_KEY: &str = "DeviceId";
const HOSTNAME_KEY: &str = "HostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";
const SHAREDACCESSSIGNATURE_KEY: &str = "SharedAccessSignature";

// Unreserved characters stay as-is, everything else in the resource uri is escaped
const RESOURCE_URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors raised while building SAS tokens or reading connection strings
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The device key is not valid base64
    #[error("device key is not valid base64")]
    InvalidKey(#[from] base64::DecodeError),
    /// The signing key was rejected by the HMAC implementation
    #[error("device key cannot be used as an HMAC key")]
    InvalidKeyLength,
    /// The signature could not be url encoded
    #[error("failed to encode the token signature")]
    Encoding(#[from] serde_urlencoded::ser::Error),
    /// A connection string component is missing
    #[error("connection string is missing `{0}`")]
    ConnectionStringMissingRequiredParameter(&'static str),
    /// The HostName component is not of the form `<hub>.<suffix>`
    #[error("connection string host name `{0}` is not a fully qualified hub name")]
    InvalidHostName(String),
}

/// Produces the SAS token handed to the CBS node
pub trait TokenSource {
    /// Token valid until `expiry`
    fn token(&self, expiry: &DateTime<Utc>) -> Result<Zeroizing<String>, TokenError>;

    /// Whether a fresh token can be produced when the current one ages
    fn is_refreshable(&self) -> bool;
}

/// Caller supplied token, handed over verbatim and never refreshed
#[derive(Debug, Clone)]
pub struct SasTokenSource {
    sas: String,
}

impl SasTokenSource {
    ///
    pub fn new(sas: impl Into<String>) -> Self {
        SasTokenSource { sas: sas.into() }
    }
}

impl TokenSource for SasTokenSource {
    fn token(&self, _: &DateTime<Utc>) -> Result<Zeroizing<String>, TokenError> {
        Ok(Zeroizing::new(self.sas.clone()))
    }

    fn is_refreshable(&self) -> bool {
        false
    }
}

/// Signs tokens for a device scope with the device's shared access key
#[derive(Clone)]
pub struct DeviceKeyTokenSource {
    scope: String,
    key: Zeroizing<String>,
    key_name: String,
}

impl std::fmt::Debug for DeviceKeyTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyTokenSource")
            .field("scope", &self.scope)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

impl DeviceKeyTokenSource {
    /// Token source for `scope`, usually `<hub fqdn>/devices/<device id>`
    pub fn new(scope: impl Into<String>, key: impl Into<String>, key_name: impl Into<String>) -> Self {
        DeviceKeyTokenSource {
            scope: scope.into(),
            key: Zeroizing::new(key.into()),
            key_name: key_name.into(),
        }
    }

    /// The scope tokens are issued for
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl TokenSource for DeviceKeyTokenSource {
    fn token(&self, expiry: &DateTime<Utc>) -> Result<Zeroizing<String>, TokenError> {
        trace!("Creating SAS token for {} expiring at {}", self.scope, expiry);
        create_sas_token(&self.key, &self.scope, &self.key_name, expiry.timestamp())
    }

    fn is_refreshable(&self) -> bool {
        true
    }
}

/// The credential a transport authenticates with
#[derive(Debug, Clone)]
pub enum TokenProvider {
    /// Tokens are signed locally from the device key
    DeviceKey(DeviceKeyTokenSource),
    /// A pre-made token
    Sas(SasTokenSource),
}

impl From<DeviceKeyTokenSource> for TokenProvider {
    fn from(source: DeviceKeyTokenSource) -> Self {
        TokenProvider::DeviceKey(source)
    }
}

impl From<SasTokenSource> for TokenProvider {
    fn from(source: SasTokenSource) -> Self {
        TokenProvider::Sas(source)
    }
}

impl TokenSource for TokenProvider {
    fn token(&self, expiry: &DateTime<Utc>) -> Result<Zeroizing<String>, TokenError> {
        match self {
            TokenProvider::DeviceKey(source) => source.token(expiry),
            TokenProvider::Sas(source) => source.token(expiry),
        }
    }

    fn is_refreshable(&self) -> bool {
        match self {
            TokenProvider::DeviceKey(source) => source.is_refreshable(),
            TokenProvider::Sas(source) => source.is_refreshable(),
        }
    }
}

/// Build a signed SAS token for `scope` that expires at `expiry` (seconds since epoch)
///
/// The key name is only appended when it is non-empty, devices authenticate
/// with an empty key name.
pub fn create_sas_token(
    key: &str,
    scope: &str,
    key_name: &str,
    expiry: i64,
) -> Result<Zeroizing<String>, TokenError> {
    let resource_uri = utf8_percent_encode(scope, RESOURCE_URI).to_string();
    let to_sign = format!("{}\n{}", resource_uri, expiry);

    let signature = generate_signature(key, &to_sign)?;

    let mut sas = format!(
        "SharedAccessSignature sr={}&{}&se={}",
        resource_uri, signature, expiry
    );
    if !key_name.is_empty() {
        sas.push_str("&skn=");
        sas.push_str(key_name);
    }

    Ok(Zeroizing::new(sas))
}

pub(crate) fn generate_signature(key: &str, message: &str) -> Result<String, TokenError> {
    let key = Zeroizing::new(STANDARD.decode(key)?);
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).map_err(|_| TokenError::InvalidKeyLength)?;
    mac.update(message.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let pairs = [("sig", signature)];
    Ok(serde_urlencoded::to_string(pairs)?)
}

/// Components of a device connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Hub name, the first label of the host name
    pub iot_hub_name: String,
    /// Remainder of the host name, e.g. `azure-devices.net`
    pub iot_hub_suffix: String,
    ///
    pub device_id: String,
    ///
    pub device_key: Option<String>,
    ///
    pub device_sas_token: Option<String>,
}

/// Parse `HostName=..;DeviceId=..;SharedAccessKey=..` (or `SharedAccessSignature=..`)
pub fn parse_connection_string(connection_string: &str) -> Result<ConnectionString, TokenError> {
    let mut key = None;
    let mut sas = None;
    let mut device_id = None;
    let mut hub = None;

    for part in connection_string.split(';') {
        // Values such as base64 keys and signatures contain '=' themselves
        let mut kv = part.splitn(2, '=');
        let (name, value) = match (kv.next(), kv.next()) {
            (Some(name), Some(value)) => (name.trim(), value.trim()),
            _ => continue,
        };
        match name {
            SHAREDACCESSKEY_KEY => key = Some(value),
            SHAREDACCESSSIGNATURE_KEY => sas = Some(value),
            DEVICEID_KEY => device_id = Some(value),
            HOSTNAME_KEY => hub = Some(value),
            _ => (), // Ignore extraneous component in the connection string
        }
    }

    let hub = hub.ok_or(TokenError::ConnectionStringMissingRequiredParameter(HOSTNAME_KEY))?;
    let device_id =
        device_id.ok_or(TokenError::ConnectionStringMissingRequiredParameter(DEVICEID_KEY))?;
    if key.is_none() && sas.is_none() {
        return Err(TokenError::ConnectionStringMissingRequiredParameter(
            SHAREDACCESSKEY_KEY,
        ));
    }

    let (iot_hub_name, iot_hub_suffix) = match hub.split_once('.') {
        Some((name, suffix)) if !name.is_empty() && !suffix.is_empty() => (name, suffix),
        _ => return Err(TokenError::InvalidHostName(hub.to_string())),
    };

    Ok(ConnectionString {
        iot_hub_name: iot_hub_name.to_string(),
        iot_hub_suffix: iot_hub_suffix.to_string(),
        device_id: device_id.to_string(),
        device_key: key.map(str::to_string),
        device_sas_token: sas.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    // Note this useful idiom: importing names from outer (for mod tests) scope.
    use super::*;
    use chrono::TimeZone;

    const KEY: &str = "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=";

    #[test]
    fn signs_device_scope() {
        let token = create_sas_token(
            KEY,
            "myiothub.azure-devices.net/devices/FirstDevice",
            "",
            1_587_123_309,
        )
        .unwrap();
        assert_eq!(*token, "SharedAccessSignature sr=myiothub.azure-devices.net%2Fdevices%2FFirstDevice&sig=vn0%2BgyIUKgaBhEU0ypyOhJ0gPK5fSY1TKdvcJ1HxhnQ%3D&se=1587123309".to_string());
    }

    #[test]
    fn key_name_is_appended_when_present() {
        let token = create_sas_token(KEY, "hub.example.net", "owner", 10).unwrap();
        assert!(token.ends_with("&se=10&skn=owner"));
    }

    #[test]
    fn invalid_key_fails() {
        let result = create_sas_token("not base64!", "hub.example.net", "", 10);
        assert!(matches!(result, Err(TokenError::InvalidKey(_))));
    }

    #[test]
    fn device_key_source_uses_expiry_timestamp() {
        let source = DeviceKeyTokenSource::new("myiothub.azure-devices.net/devices/FirstDevice", KEY, "");
        let expiry = Utc.timestamp_opt(1_587_123_309, 0).unwrap();
        let token = source.token(&expiry).unwrap();
        assert!(token.ends_with("&se=1587123309"));
        assert!(source.is_refreshable());
    }

    #[test]
    fn sas_source_is_verbatim_and_not_refreshable() {
        let source: TokenProvider = SasTokenSource::new("SharedAccessSignature sr=a&sig=b&se=1").into();
        let token = source.token(&Utc::now()).unwrap();
        assert_eq!(*token, "SharedAccessSignature sr=a&sig=b&se=1");
        assert!(!source.is_refreshable());
    }

    #[test]
    fn parses_key_connection_string() {
        let cs = parse_connection_string(
            "HostName=myhub.azure-devices.net;DeviceId=dev1;SharedAccessKey=abc=",
        )
        .unwrap();
        assert_eq!(cs.iot_hub_name, "myhub");
        assert_eq!(cs.iot_hub_suffix, "azure-devices.net");
        assert_eq!(cs.device_id, "dev1");
        assert_eq!(cs.device_key.as_deref(), Some("abc="));
        assert_eq!(cs.device_sas_token, None);
    }

    #[test]
    fn parses_signature_connection_string() {
        let cs = parse_connection_string(
            "HostName=myhub.azure-devices.net;DeviceId=dev1;SharedAccessSignature=SharedAccessSignature sr=x&sig=y%3D&se=5",
        )
        .unwrap();
        assert_eq!(
            cs.device_sas_token.as_deref(),
            Some("SharedAccessSignature sr=x&sig=y%3D&se=5")
        );
    }

    #[test]
    fn connection_string_requires_credentials() {
        let result = parse_connection_string("HostName=myhub.azure-devices.net;DeviceId=dev1");
        assert!(matches!(
            result,
            Err(TokenError::ConnectionStringMissingRequiredParameter("SharedAccessKey"))
        ));
    }

    #[test]
    fn connection_string_requires_qualified_host() {
        let result = parse_connection_string("HostName=myhub;DeviceId=dev1;SharedAccessKey=a");
        assert!(matches!(result, Err(TokenError::InvalidHostName(_))));
    }
}
