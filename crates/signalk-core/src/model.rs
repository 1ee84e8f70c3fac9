//! SignalK delta types.
//!
//! Deltas are the canonical events flowing out of every provider pipeline
//! and into the event bus. A delta names a context (which vessel) and carries
//! one or more updates, each a batch of path/value pairs from one source.

use serde::{Deserialize, Serialize};

/// Context used when a delta does not name one.
pub const SELF_CONTEXT: &str = "vessels.self";

/// A SignalK delta message containing one or more updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// The context path (e.g., "vessels.urn:mrn:signalk:uuid:...")
    /// If None, defaults to "vessels.self"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// The list of updates in this delta
    pub updates: Vec<Update>,
}

impl Delta {
    /// Build a self-vessel delta with a single update.
    pub fn for_self(update: Update) -> Self {
        Self {
            context: Some(SELF_CONTEXT.to_string()),
            updates: vec![update],
        }
    }

    /// The context this delta applies to, with the implicit default applied.
    pub fn context_or_self(&self) -> &str {
        self.context.as_deref().unwrap_or(SELF_CONTEXT)
    }

    /// True if this delta describes the local vessel.
    ///
    /// `self_urn` is the full context of the local vessel, e.g.
    /// "vessels.urn:mrn:signalk:uuid:...". The literal "vessels.self" and an
    /// absent context both refer to it as well.
    pub fn is_self(&self, self_urn: &str) -> bool {
        let context = self.context_or_self();
        context == SELF_CONTEXT || context == self_urn
    }

    /// Iterate over every path/value pair in update order.
    pub fn values(&self) -> impl Iterator<Item = &PathValue> {
        self.updates.iter().flat_map(|u| u.values.iter())
    }
}

/// A single update within a delta, containing values from one source at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Reference to source in /sources (e.g., "nmea0183.GP")
    #[serde(rename = "$source", skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    /// Embedded source object (alternative to $source)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    /// ISO 8601 timestamp (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// The path-value pairs in this update
    #[serde(default)]
    pub values: Vec<PathValue>,
}

impl Update {
    /// Create an update with no source information.
    pub fn new(timestamp: Option<String>, values: Vec<PathValue>) -> Self {
        Self {
            source_ref: None,
            source: None,
            timestamp,
            values,
        }
    }
}

/// A single path-value pair within an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    /// The SignalK path (e.g., "navigation.speedOverGround")
    pub path: String,

    /// The value at this path
    pub value: serde_json::Value,
}

impl PathValue {
    pub fn new(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Source information describing where data originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Label identifying the provider (e.g., "N2K-1", "serial-COM1")
    pub label: String,

    /// Type of source (e.g., "NMEA0183", "NMEA2000", "signalk")
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// NMEA 2000 source address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    /// NMEA 2000 PGN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pgn: Option<u32>,

    /// NMEA 0183 sentence type (e.g., "RMC", "GGA")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,

    /// NMEA 0183 talker ID (e.g., "GP", "II")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talker: Option<String>,
}
