//! Records flowing between pipeline stages.

use std::fmt;

use signalk_core::Delta;

/// One unit of data handed from a stage to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Raw bytes as read from a transport.
    Chunk(Vec<u8>),
    /// One framed text record, without its terminator.
    Line(String),
    /// A decoded NMEA 2000 message in analyzer JSON form.
    Pgn(serde_json::Value),
    /// A canonical event.
    Delta(Delta),
}

impl Record {
    pub fn shape(&self) -> RecordShape {
        match self {
            Record::Chunk(_) => RecordShape::Chunk,
            Record::Line(_) => RecordShape::Line,
            Record::Pgn(_) => RecordShape::Pgn,
            Record::Delta(_) => RecordShape::Delta,
        }
    }
}

/// The kind of [`Record`] a stage accepts or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordShape {
    Chunk,
    Line,
    Pgn,
    Delta,
}

impl fmt::Display for RecordShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordShape::Chunk => "chunk",
            RecordShape::Line => "line",
            RecordShape::Pgn => "pgn",
            RecordShape::Delta => "delta",
        };
        f.write_str(name)
    }
}
