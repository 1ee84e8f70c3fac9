//! The stage contract and the registry of stage constructors.
//!
//! A stage is a unidirectional record transformer running as its own task.
//! It reads records from its input link and writes records to its output
//! link. Closing the input is the end-of-input signal; a stage finishes its
//! work, returns, and in doing so closes its output, which is the signal for
//! the next stage. Links are bounded, so a stage waiting on `send` holds its
//! own upstream back.
//!
//! Stages are created by a [`StageFactory`] from a [`StageOptions`] record
//! and the shared [`AppContext`]. Construction must not perform I/O; the
//! composer relies on that to reject a configuration without side effects.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use signalk_core::ConfigError;
use tokio::sync::mpsc;

use crate::error::StageError;
use crate::record::{Record, RecordShape};
use crate::stages;

/// Every kind of stage a pipeline can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Subprocess whose stdout is read as raw bytes.
    Execute,
    /// `candump` subprocess, read line by line.
    CanDump,
    /// Reads a recorded file.
    FileReader,
    /// Paces raw bytes to a fixed rate.
    Throttle,
    /// Splits raw bytes into lines.
    Liner,
    TcpClient,
    UdpListener,
    SerialPort,
    /// Signal K websocket client located by discovery or address.
    DiscoveryClient,
    /// Writes every record to the multiplexed raw log.
    Recorder,
    /// Signal K delta JSON decoder.
    FromJson,
    Nmea0183Decoder,
    /// NMEA 2000 frame analyzer producing PGN JSON.
    N2kAnalyzer,
    /// Maps analyzed PGNs to deltas.
    N2kMapper,
    /// Decoder for multiplexed raw logs.
    MultiplexedLog,
}

/// How a stage relates its input shape to its output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageShape {
    /// Starts a pipeline; its input only carries end-of-input.
    Source(RecordShape),
    /// Consumes one shape and produces another.
    Transform {
        input: RecordShape,
        output: RecordShape,
    },
    /// Passes records through unchanged.
    Passthrough,
}

impl StageKind {
    pub const ALL: [StageKind; 15] = [
        StageKind::Execute,
        StageKind::CanDump,
        StageKind::FileReader,
        StageKind::Throttle,
        StageKind::Liner,
        StageKind::TcpClient,
        StageKind::UdpListener,
        StageKind::SerialPort,
        StageKind::DiscoveryClient,
        StageKind::Recorder,
        StageKind::FromJson,
        StageKind::Nmea0183Decoder,
        StageKind::N2kAnalyzer,
        StageKind::N2kMapper,
        StageKind::MultiplexedLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Execute => "execute",
            StageKind::CanDump => "candump",
            StageKind::FileReader => "filestream",
            StageKind::Throttle => "throttle",
            StageKind::Liner => "liner",
            StageKind::TcpClient => "tcp",
            StageKind::UdpListener => "udp",
            StageKind::SerialPort => "serialport",
            StageKind::DiscoveryClient => "mdns-ws",
            StageKind::Recorder => "log",
            StageKind::FromJson => "from_json",
            StageKind::Nmea0183Decoder => "nmea0183-signalk",
            StageKind::N2kAnalyzer => "n2kAnalyzer",
            StageKind::N2kMapper => "n2k-signalk",
            StageKind::MultiplexedLog => "multiplexedlog",
        }
    }

    pub fn shape(&self) -> StageShape {
        use RecordShape::*;
        match self {
            StageKind::Execute
            | StageKind::FileReader
            | StageKind::TcpClient
            | StageKind::UdpListener
            | StageKind::SerialPort => StageShape::Source(Chunk),
            StageKind::CanDump => StageShape::Source(Line),
            StageKind::DiscoveryClient => StageShape::Source(Delta),
            StageKind::Throttle => StageShape::Transform {
                input: Chunk,
                output: Chunk,
            },
            StageKind::Liner => StageShape::Transform {
                input: Chunk,
                output: Line,
            },
            StageKind::Recorder => StageShape::Passthrough,
            StageKind::FromJson | StageKind::Nmea0183Decoder | StageKind::MultiplexedLog => {
                StageShape::Transform {
                    input: Line,
                    output: Delta,
                }
            }
            StageKind::N2kAnalyzer => StageShape::Transform {
                input: Line,
                output: Pgn,
            },
            StageKind::N2kMapper => StageShape::Transform {
                input: Pgn,
                output: Delta,
            },
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stage contract
// ============================================================================

/// The pair of links a running stage owns.
pub struct StageLink {
    pub input: mpsc::Receiver<Record>,
    pub output: mpsc::Sender<Record>,
}

impl StageLink {
    /// Send a record downstream, waiting while the downstream link is full.
    ///
    /// Returns false once the downstream stage has gone away.
    pub async fn send(&self, record: Record) -> bool {
        self.output.send(record).await.is_ok()
    }

    /// Send from a source stage, giving up if end-of-input arrives while
    /// the downstream link is full.
    pub async fn emit(&mut self, record: Record) -> bool {
        tokio::select! {
            _ = end_of_input(&mut self.input) => false,
            sent = self.output.send(record) => sent.is_ok(),
        }
    }
}

/// Resolves once upstream signals end-of-input.
///
/// Sources use this on their input link; anything sent to a source is
/// discarded.
pub async fn end_of_input(input: &mut mpsc::Receiver<Record>) {
    while input.recv().await.is_some() {}
}

/// A constructed, not yet running, stage.
pub trait Stage: Send + 'static {
    /// Run until end-of-input or until downstream goes away.
    fn run(self: Box<Self>, link: StageLink) -> BoxFuture<'static, Result<(), StageError>>;
}

/// Context shared by every stage of every pipeline.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    /// Full context of the local vessel.
    pub self_urn: String,
    /// Directory the recorder writes into.
    pub logging_directory: Option<PathBuf>,
}

/// Options handed to one stage: its own copy of the provider's sub-options
/// plus anything the composer adds for that stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOptions {
    values: Map<String, Value>,
}

impl StageOptions {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.values.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(other) if !other.is_null() => Err(invalid(key, "expected a non-empty string")),
            _ => Err(ConfigError::MissingOption(key.to_string())),
        }
    }

    /// A non-negative integer, also accepted as a numeric string.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, "expected a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| invalid(key, "expected a non-negative integer")),
            Some(_) => Err(invalid(key, "expected a non-negative integer")),
        }
    }

    pub fn require_port(&self, key: &str) -> Result<u16, ConfigError> {
        let port = self
            .get_u64(key)?
            .ok_or_else(|| ConfigError::MissingOption(key.to_string()))?;
        u16::try_from(port).map_err(|_| invalid(key, "port out of range"))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

fn invalid(option: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidOption {
        option: option.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Constructs stages of one kind.
pub trait StageFactory: Send + Sync {
    fn create(
        &self,
        options: StageOptions,
        app: &Arc<AppContext>,
    ) -> Result<Box<dyn Stage>, ConfigError>;
}

impl<F> StageFactory for F
where
    F: Fn(StageOptions, &Arc<AppContext>) -> Result<Box<dyn Stage>, ConfigError> + Send + Sync,
{
    fn create(
        &self,
        options: StageOptions,
        app: &Arc<AppContext>,
    ) -> Result<Box<dyn Stage>, ConfigError> {
        self(options, app)
    }
}

/// Maps each stage kind to its constructor.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: HashMap<StageKind, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the stages shipped with this crate.
    ///
    /// Serial ports, the discovery client and the NMEA decoders are not
    /// included and must be registered by the host.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        stages::register_builtins(&mut registry);
        registry
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: StageKind, factory: impl StageFactory + 'static) {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn StageFactory>> {
        self.factories.get(&kind)
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.factories.keys().map(StageKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("StageRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> StageOptions {
        match value {
            Value::Object(map) => StageOptions::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_require_str() {
        let opts = options(json!({"host": "10.0.0.5", "empty": "", "num": 3}));
        assert_eq!(opts.require_str("host").unwrap(), "10.0.0.5");
        assert!(matches!(opts.require_str("missing"), Err(ConfigError::MissingOption(_))));
        assert!(matches!(opts.require_str("empty"), Err(ConfigError::InvalidOption { .. })));
        assert!(matches!(opts.require_str("num"), Err(ConfigError::InvalidOption { .. })));
    }

    #[test]
    fn test_port_accepts_numbers_and_strings() {
        let opts = options(json!({"a": 10110, "b": "2000", "c": 70000, "d": -1}));
        assert_eq!(opts.require_port("a").unwrap(), 10110);
        assert_eq!(opts.require_port("b").unwrap(), 2000);
        assert!(opts.require_port("c").is_err());
        assert!(opts.require_port("d").is_err());
        assert!(matches!(opts.require_port("e"), Err(ConfigError::MissingOption(_))));
    }

    #[test]
    fn test_every_kind_has_a_distinct_name() {
        let mut names: Vec<&str> = StageKind::ALL.iter().map(StageKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StageKind::ALL.len());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = StageRegistry::with_builtins();
        for kind in [
            StageKind::Execute,
            StageKind::CanDump,
            StageKind::FileReader,
            StageKind::Throttle,
            StageKind::Liner,
            StageKind::TcpClient,
            StageKind::UdpListener,
            StageKind::Recorder,
            StageKind::FromJson,
        ] {
            assert!(registry.contains(kind), "missing builtin {kind}");
        }
        for kind in [
            StageKind::SerialPort,
            StageKind::DiscoveryClient,
            StageKind::Nmea0183Decoder,
            StageKind::N2kAnalyzer,
            StageKind::N2kMapper,
            StageKind::MultiplexedLog,
        ] {
            assert!(!registry.contains(kind), "unexpected builtin {kind}");
        }
    }
}
