//! Line framer: turns a byte stream into text lines.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tracing::warn;

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{AppContext, Stage, StageKind, StageLink, StageOptions};

const DEFAULT_SEPARATOR: &str = "\n";

/// Longest line kept while waiting for a separator.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits incoming chunks on a separator.
///
/// Lines are decoded lossily as UTF-8, a trailing `\r` is dropped and empty
/// lines are skipped. A partial line left at end-of-input is still emitted.
/// A line that grows past the limit is dropped up to its separator.
#[derive(Debug)]
pub struct Liner {
    separator: Vec<u8>,
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a separator.
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(Liner::from_options(&options)?))
}

impl Liner {
    pub fn new(separator: &str) -> Self {
        Self::with_limit(separator, MAX_LINE_BYTES)
    }

    pub fn with_limit(separator: &str, max_line: usize) -> Self {
        Self {
            separator: separator.as_bytes().to_vec(),
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    fn from_options(options: &StageOptions) -> Result<Self, ConfigError> {
        let separator = options.get_str("lineSeparator").unwrap_or(DEFAULT_SEPARATOR);
        if separator.is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "lineSeparator".to_string(),
                reason: "separator must not be empty".to_string(),
            });
        }
        Ok(Self::new(separator))
    }

    /// Append bytes and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let overlap = self.separator.len() - 1;
        loop {
            // A separator may straddle the previous scan boundary.
            let from = self.scanned.saturating_sub(overlap);
            let Some(offset) = find(&self.buffer[from..], &self.separator) else {
                self.scanned = self.buffer.len();
                break;
            };
            let line = self.buffer.split_to(from + offset);
            self.buffer.advance(self.separator.len());
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(line) = to_line(&line) {
                lines.push(line);
            }
        }

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                warn!(
                    "Dropping line longer than {} bytes with no separator",
                    self.max_line
                );
            }
            // Keep a possible separator prefix at the tail.
            self.buffer.advance(self.buffer.len() - overlap);
            self.scanned = self.buffer.len();
            self.discarding = true;
        }
        lines
    }

    /// Whatever is left after the last separator.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        to_line(&rest)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn to_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.strip_suffix('\r').unwrap_or(&*text);
    (!line.is_empty()).then(|| line.to_string())
}

impl Stage for Liner {
    fn run(mut self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            while let Some(record) = link.input.recv().await {
                let shape = record.shape();
                let Record::Chunk(bytes) = record else {
                    return Err(StageError::UnexpectedRecord {
                        stage: StageKind::Liner,
                        shape,
                    });
                };
                for line in self.push(&bytes) {
                    if !link.send(Record::Line(line)).await {
                        return Ok(());
                    }
                }
            }
            if let Some(line) = self.finish() {
                link.send(Record::Line(line)).await;
            }
            Ok(())
        }
        .boxed()
    }
}
