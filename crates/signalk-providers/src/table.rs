//! The stage table: which stages a provider gets, and in which order.
//!
//! A provider resolves to a [`SourceKind`] (transport plus sub-type) and a
//! [`DataType`]. The pair maps to an ordered list of stage kinds or to
//! `None` when the source cannot carry that data. Both lookups are
//! exhaustive matches, so a new source or data type cannot fall through
//! silently. [`check_shapes`] then verifies that every stage accepts what
//! its predecessor produces and that the chain ends in deltas.

use std::fmt;

use signalk_core::{ConfigError, DataType, TransportType};

use crate::error::ProviderError;
use crate::record::RecordShape;
use crate::stage::{StageKind, StageShape};

/// Where a provider's records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Actisense NGT-1 through the `actisense-serial` bridge.
    ActisenseSerial,
    /// SocketCAN interface through `candump`.
    CanDump,
    /// Arbitrary command.
    Execute,
    /// Recorded file.
    File,
    Tcp,
    Udp,
    Serial,
    /// Signal K websocket (`ws` or `wss`), yielding deltas directly.
    Discovery,
}

impl SourceKind {
    pub const ALL: [SourceKind; 8] = [
        SourceKind::ActisenseSerial,
        SourceKind::CanDump,
        SourceKind::Execute,
        SourceKind::File,
        SourceKind::Tcp,
        SourceKind::Udp,
        SourceKind::Serial,
        SourceKind::Discovery,
    ];

    /// Resolve the transport and its `subOptions.type`.
    pub fn resolve(transport: TransportType, sub_type: Option<&str>) -> Result<Self, ConfigError> {
        let unknown = || ConfigError::UnknownSubType {
            transport: transport.to_string(),
            sub_type: sub_type.unwrap_or_default().to_string(),
        };

        match transport {
            TransportType::Nmea2000 => match sub_type {
                Some("ngt-1") => Ok(SourceKind::ActisenseSerial),
                Some("canbus") => Ok(SourceKind::CanDump),
                _ => Err(unknown()),
            },
            TransportType::Nmea0183 => match sub_type {
                Some("tcp") => Ok(SourceKind::Tcp),
                Some("udp") => Ok(SourceKind::Udp),
                Some("serial") => Ok(SourceKind::Serial),
                _ => Err(unknown()),
            },
            TransportType::Execute => Ok(SourceKind::Execute),
            TransportType::FileStream => Ok(SourceKind::File),
            TransportType::SignalK => match sub_type {
                Some("ws") | Some("wss") => Ok(SourceKind::Discovery),
                Some("tcp") => Ok(SourceKind::Tcp),
                Some("udp") => Ok(SourceKind::Udp),
                _ => Err(unknown()),
            },
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::ActisenseSerial => "ngt-1",
            SourceKind::CanDump => "canbus",
            SourceKind::Execute => "execute",
            SourceKind::File => "file",
            SourceKind::Tcp => "tcp",
            SourceKind::Udp => "udp",
            SourceKind::Serial => "serial",
            SourceKind::Discovery => "ws",
        };
        f.write_str(name)
    }
}

/// Stages that read the transport and frame its output.
pub fn source_stages(source: SourceKind, data_type: DataType) -> &'static [StageKind] {
    use StageKind::*;
    match source {
        SourceKind::ActisenseSerial => &[Execute, Liner],
        SourceKind::CanDump => &[CanDump],
        SourceKind::Execute => &[Execute, Liner],
        // A multiplexed log carries its own timing, so it is not throttled.
        SourceKind::File => match data_type {
            DataType::Multiplexed => &[FileReader, Liner],
            DataType::SignalK | DataType::Nmea0183 | DataType::Nmea2000 => {
                &[FileReader, Throttle, Liner]
            }
        },
        SourceKind::Tcp => &[TcpClient, Liner],
        SourceKind::Udp => &[UdpListener, Liner],
        SourceKind::Serial => &[SerialPort, Liner],
        SourceKind::Discovery => &[DiscoveryClient],
    }
}

/// Stages that turn framed records into deltas, or `None` if unsupported.
pub fn decoder_stages(source: SourceKind, data_type: DataType) -> Option<&'static [StageKind]> {
    use StageKind::*;
    let websocket = source == SourceKind::Discovery;
    match data_type {
        DataType::SignalK if websocket => Some(&[]),
        DataType::SignalK => Some(&[FromJson]),
        DataType::Nmea0183 | DataType::Nmea2000 | DataType::Multiplexed if websocket => None,
        DataType::Nmea0183 => Some(&[Nmea0183Decoder]),
        DataType::Nmea2000 => Some(&[N2kAnalyzer, N2kMapper]),
        DataType::Multiplexed => Some(&[MultiplexedLog]),
    }
}

/// The full ordered stage list for a provider.
pub fn stage_plan(
    source: SourceKind,
    data_type: DataType,
    logging: bool,
) -> Result<Vec<StageKind>, ProviderError> {
    let decoders = decoder_stages(source, data_type).ok_or(ProviderError::Unsupported {
        source_kind: source,
        data_type,
    })?;

    let mut kinds = source_stages(source, data_type).to_vec();
    if logging {
        kinds.push(StageKind::Recorder);
    }
    kinds.extend_from_slice(decoders);
    Ok(kinds)
}

/// Verify that consecutive stages agree on record shapes.
pub fn check_shapes(kinds: &[StageKind]) -> Result<(), ProviderError> {
    let Some((first, rest)) = kinds.split_first() else {
        return Err(ProviderError::Config(ConfigError::InvalidOption {
            option: "type".to_string(),
            reason: "pipeline has no stages".to_string(),
        }));
    };

    let mut current = match first.shape() {
        StageShape::Source(output) => output,
        StageShape::Transform { input, .. } => {
            return Err(ProviderError::ShapeMismatch {
                stage: *first,
                upstream: input,
            })
        }
        StageShape::Passthrough => {
            return Err(ProviderError::ShapeMismatch {
                stage: *first,
                upstream: RecordShape::Chunk,
            })
        }
    };

    for kind in rest {
        current = match kind.shape() {
            StageShape::Source(_) => {
                return Err(ProviderError::ShapeMismatch {
                    stage: *kind,
                    upstream: current,
                })
            }
            StageShape::Transform { input, output } if input == current => output,
            StageShape::Transform { .. } => {
                return Err(ProviderError::ShapeMismatch {
                    stage: *kind,
                    upstream: current,
                })
            }
            StageShape::Passthrough => current,
        };
    }

    if current != RecordShape::Delta {
        return Err(ProviderError::NotDeltaProducing(current));
    }
    Ok(())
}
