//! Gateway settings and provider configuration.
//!
//! Settings are read from a JSON document shaped like the Signal K server
//! `settings.json`:
//!
//! ```json
//! {
//!   "vessel": { "name": "Aurora", "uuid": "c0d79334-4e25-4245-8892-54e8ccc8021d" },
//!   "loggingDirectory": "/var/log/signalk",
//!   "nmea0183Tcp": { "enabled": true, "port": 10110 },
//!   "pipedProviders": [{
//!     "id": "gps",
//!     "pipeElements": [{
//!       "type": "providers/simple",
//!       "options": { "type": "NMEA0183", "subOptions": { "type": "tcp", "host": "10.0.0.5", "port": 10110 } }
//!     }]
//!   }]
//! }
//! ```
//!
//! Type names are kept as strings in [`ProviderConfig`] and only resolved to
//! [`TransportType`] / [`DataType`] when a pipeline is composed, so that every
//! validation failure surfaces from the same place.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The only pipe element type the composer knows how to build.
pub const SIMPLE_PIPE_ELEMENT: &str = "providers/simple";

/// Default TCP port for NMEA 0183 output.
pub const DEFAULT_NMEA0183_TCP_PORT: u16 = 10110;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The provider type does not name a known transport.
    #[error("invalid type: {0}")]
    UnknownTransport(String),

    /// The data type does not name a known decoder family.
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// The `subOptions.type` value is not valid for the transport.
    #[error("unknown {transport} type: {sub_type}")]
    UnknownSubType { transport: String, sub_type: String },

    /// A required sub-option is absent.
    #[error("missing option '{0}'")]
    MissingOption(String),

    /// A sub-option is present but malformed.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    /// A pipe element other than `providers/simple`.
    #[error("unsupported pipe element type: {0}")]
    UnsupportedPipeElement(String),

    /// A piped provider without any pipe element.
    #[error("provider {0} has no pipe elements")]
    EmptyProvider(String),

    /// Failed to read the settings file.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// The settings document is not valid JSON or has the wrong shape.
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Transport and data types
// ============================================================================

/// Transport families a provider can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Physical NMEA 2000 CAN bus (Actisense NGT-1 or SocketCAN).
    Nmea2000,
    /// NMEA 0183 over TCP, UDP or a serial port.
    Nmea0183,
    /// Output of an arbitrary command.
    Execute,
    /// Replay of a recorded file.
    FileStream,
    /// Another Signal K server, by discovery or address.
    SignalK,
}

impl TransportType {
    pub const ALL: [TransportType; 5] = [
        TransportType::Nmea2000,
        TransportType::Nmea0183,
        TransportType::Execute,
        TransportType::FileStream,
        TransportType::SignalK,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Nmea2000 => "NMEA2000",
            TransportType::Nmea0183 => "NMEA0183",
            TransportType::Execute => "Execute",
            TransportType::FileStream => "FileStream",
            TransportType::SignalK => "SignalK",
        }
    }
}

impl FromStr for TransportType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownTransport(s.to_string()))
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoder families that turn framed records into deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Signal K delta JSON.
    SignalK,
    /// NMEA 0183 sentences.
    Nmea0183,
    /// NMEA 2000 frames.
    Nmea2000,
    /// Multiplexed log written by the stream recorder.
    Multiplexed,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::SignalK,
        DataType::Nmea0183,
        DataType::Nmea2000,
        DataType::Multiplexed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::SignalK => "SignalK",
            DataType::Nmea0183 => "NMEA0183",
            DataType::Nmea2000 => "NMEA2000",
            DataType::Multiplexed => "Multiplexed",
        }
    }

    /// One-character tag the stream recorder writes in front of each record.
    ///
    /// A multiplexed log already carries per-line tags, so it has none.
    pub fn discriminator(&self) -> Option<char> {
        match self {
            DataType::SignalK => Some('I'),
            DataType::Nmea0183 => Some('N'),
            DataType::Nmea2000 => Some('A'),
            DataType::Multiplexed => None,
        }
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownDataType(s.to_string()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Provider configuration
// ============================================================================

/// Configuration of one provider, as consumed by the pipeline composer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Provider identifier, used as the source label.
    pub id: String,
    /// Transport type name (e.g., "NMEA0183").
    pub transport: String,
    /// Record every framed record with the stream recorder.
    pub logging: bool,
    /// Transport and decoder specific options.
    pub sub_options: Map<String, Value>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transport: transport.into(),
            logging: false,
            sub_options: Map::new(),
        }
    }

    /// Set a sub-option, builder style.
    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.sub_options.insert(key.to_string(), value.into());
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Name of the decoder family: `subOptions.dataType`, else the transport name.
    pub fn data_type_name(&self) -> Result<&str, ConfigError> {
        match self.sub_options.get("dataType") {
            None | Some(Value::Null) => Ok(&self.transport),
            Some(Value::String(s)) if s.is_empty() => Ok(&self.transport),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ConfigError::InvalidOption {
                option: "dataType".to_string(),
                reason: format!("expected a string, got {other}"),
            }),
        }
    }

    /// The `subOptions.type` value, if any.
    pub fn sub_type(&self) -> Option<&str> {
        self.sub_options.get("type").and_then(Value::as_str)
    }
}

// ============================================================================
// Settings file
// ============================================================================

/// Top-level gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Local vessel identity.
    #[serde(default)]
    pub vessel: VesselInfo,

    /// Directory the stream recorder writes into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_directory: Option<String>,

    /// NMEA 0183 TCP output server.
    #[serde(default)]
    pub nmea0183_tcp: Nmea0183TcpSettings,

    /// Configured providers.
    #[serde(default)]
    pub piped_providers: Vec<PipedProvider>,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Providers that are not disabled, in declaration order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &PipedProvider> {
        self.piped_providers.iter().filter(|p| p.enabled)
    }
}

/// Vessel information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmsi: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl VesselInfo {
    /// Full context of the local vessel.
    ///
    /// Prefers the configured UUID, then the MMSI. Without either a random
    /// UUID is generated, which changes on every start.
    pub fn self_urn(&self) -> String {
        if let Some(uuid) = self.uuid.as_deref().filter(|u| !u.is_empty()) {
            let uuid = uuid.strip_prefix("urn:mrn:signalk:uuid:").unwrap_or(uuid);
            format!("vessels.urn:mrn:signalk:uuid:{uuid}")
        } else if let Some(mmsi) = self.mmsi.as_deref().filter(|m| !m.is_empty()) {
            format!("vessels.urn:mrn:imo:mmsi:{mmsi}")
        } else {
            format!("vessels.urn:mrn:signalk:uuid:{}", uuid::Uuid::new_v4())
        }
    }
}

/// NMEA 0183 TCP output server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nmea0183TcpSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_nmea0183_port")]
    pub port: u16,
}

impl Default for Nmea0183TcpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_NMEA0183_TCP_PORT,
        }
    }
}

/// A provider entry in `pipedProviders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedProvider {
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub pipe_elements: Vec<PipeElement>,
}

impl PipedProvider {
    /// Resolve the provider's pipe element into a [`ProviderConfig`].
    pub fn to_config(&self) -> Result<ProviderConfig, ConfigError> {
        let element = self
            .pipe_elements
            .first()
            .ok_or_else(|| ConfigError::EmptyProvider(self.id.clone()))?;
        if element.element_type != SIMPLE_PIPE_ELEMENT {
            return Err(ConfigError::UnsupportedPipeElement(element.element_type.clone()));
        }

        Ok(ProviderConfig {
            id: self.id.clone(),
            transport: element.options.transport.clone(),
            logging: element.options.logging,
            sub_options: element.options.sub_options.clone(),
        })
    }
}

/// One element of a provider's pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeElement {
    #[serde(rename = "type")]
    pub element_type: String,

    #[serde(default)]
    pub options: SimpleOptions,
}

/// Options of a `providers/simple` pipe element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleOptions {
    /// Transport type name.
    #[serde(rename = "type", default)]
    pub transport: String,

    #[serde(default)]
    pub logging: bool,

    #[serde(default)]
    pub sub_options: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_nmea0183_port() -> u16 {
    DEFAULT_NMEA0183_TCP_PORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SETTINGS: &str = r#"{
        "vessel": { "name": "Aurora", "uuid": "c0d79334-4e25-4245-8892-54e8ccc8021d" },
        "loggingDirectory": "/tmp/signalk-logs",
        "pipedProviders": [
            {
                "id": "gps",
                "pipeElements": [{
                    "type": "providers/simple",
                    "options": {
                        "type": "NMEA0183",
                        "logging": true,
                        "subOptions": { "type": "tcp", "host": "10.0.0.5", "port": 10110 }
                    }
                }]
            },
            {
                "id": "replay",
                "enabled": false,
                "pipeElements": [{
                    "type": "providers/simple",
                    "options": { "type": "FileStream", "subOptions": { "dataType": "NMEA2000", "filename": "n2k.log" } }
                }]
            }
        ]
    }"#;

    #[test]
    fn test_settings_parse() {
        let settings = Settings::from_json(SETTINGS).unwrap();

        assert_eq!(settings.vessel.name.as_deref(), Some("Aurora"));
        assert_eq!(settings.logging_directory.as_deref(), Some("/tmp/signalk-logs"));
        assert_eq!(settings.piped_providers.len(), 2);
        assert!(settings.nmea0183_tcp.enabled);
        assert_eq!(settings.nmea0183_tcp.port, 10110);
    }

    #[test]
    fn test_enabled_providers_skip_disabled() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let ids: Vec<&str> = settings.enabled_providers().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["gps"]);
    }

    #[test]
    fn test_provider_to_config() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let config = settings.piped_providers[0].to_config().unwrap();

        assert_eq!(config.id, "gps");
        assert_eq!(config.transport, "NMEA0183");
        assert!(config.logging);
        assert_eq!(config.sub_type(), Some("tcp"));
        assert_eq!(config.data_type_name().unwrap(), "NMEA0183");
    }

    #[test]
    fn test_data_type_from_sub_options() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let config = settings.piped_providers[1].to_config().unwrap();
        assert_eq!(config.data_type_name().unwrap(), "NMEA2000");
    }

    #[test]
    fn test_data_type_must_be_string() {
        let config = ProviderConfig::new("x", "Execute").with_option("dataType", 42);
        assert!(matches!(
            config.data_type_name(),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_unsupported_pipe_element() {
        let provider: PipedProvider = serde_json::from_str(
            r#"{"id": "p", "pipeElements": [{"type": "providers/custom"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            provider.to_config(),
            Err(ConfigError::UnsupportedPipeElement(t)) if t == "providers/custom"
        ));
    }

    #[test]
    fn test_empty_provider() {
        let provider: PipedProvider = serde_json::from_str(r#"{"id": "p"}"#).unwrap();
        assert!(matches!(provider.to_config(), Err(ConfigError::EmptyProvider(_))));
    }

    #[test]
    fn test_type_names_round_trip() {
        for transport in TransportType::ALL {
            assert_eq!(transport.as_str().parse::<TransportType>().unwrap(), transport);
        }
        for data_type in DataType::ALL {
            assert_eq!(data_type.as_str().parse::<DataType>().unwrap(), data_type);
        }
        assert!(matches!(
            "bogus".parse::<TransportType>(),
            Err(ConfigError::UnknownTransport(t)) if t == "bogus"
        ));
        assert!(matches!(
            "bogus".parse::<DataType>(),
            Err(ConfigError::UnknownDataType(t)) if t == "bogus"
        ));
    }

    #[test]
    fn test_discriminators() {
        assert_eq!(DataType::SignalK.discriminator(), Some('I'));
        assert_eq!(DataType::Nmea0183.discriminator(), Some('N'));
        assert_eq!(DataType::Nmea2000.discriminator(), Some('A'));
        assert_eq!(DataType::Multiplexed.discriminator(), None);
    }

    #[test]
    fn test_self_urn() {
        let vessel = VesselInfo {
            uuid: Some("c0d79334-4e25-4245-8892-54e8ccc8021d".to_string()),
            ..Default::default()
        };
        assert_eq!(
            vessel.self_urn(),
            "vessels.urn:mrn:signalk:uuid:c0d79334-4e25-4245-8892-54e8ccc8021d"
        );

        let vessel = VesselInfo {
            mmsi: Some("230099999".to_string()),
            ..Default::default()
        };
        assert_eq!(vessel.self_urn(), "vessels.urn:mrn:imo:mmsi:230099999");

        let generated = VesselInfo::default().self_urn();
        assert!(generated.starts_with("vessels.urn:mrn:signalk:uuid:"));
    }
}
