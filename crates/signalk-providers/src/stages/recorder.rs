//! Stream recorder.
//!
//! Every record passing through is appended to an hourly raw log in the
//! logging directory, one record per line as
//! `<epoch millis>;<discriminator>;<payload>`. Providers whose data is
//! already multiplexed (no discriminator) are written as-is.
//! Writing is best-effort: failures are logged and records keep flowing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{AppContext, Stage, StageLink, StageOptions};

/// Name of the raw log file covering the hour of `at`.
pub fn log_file_name(at: DateTime<Utc>) -> String {
    format!("skserver-raw_{}.log", at.format("%Y-%m-%dT%H"))
}

/// Passthrough stage writing the multiplexed raw log.
#[derive(Debug)]
pub struct Recorder {
    directory: PathBuf,
    discriminator: Option<String>,
    provider: String,
}

pub(crate) fn create(
    options: StageOptions,
    app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    let directory = app
        .logging_directory
        .clone()
        .ok_or_else(|| ConfigError::MissingOption("loggingDirectory".to_string()))?;
    Ok(Box::new(Recorder {
        directory,
        discriminator: options.get_str("discriminator").map(str::to_string),
        provider: options.get_str("providerId").unwrap_or_default().to_string(),
    }))
}

impl Recorder {
    pub fn new(directory: impl Into<PathBuf>, discriminator: Option<&str>) -> Self {
        Self {
            directory: directory.into(),
            discriminator: discriminator.map(str::to_string),
            provider: String::new(),
        }
    }

    /// Format one log entry, without the trailing newline.
    fn entry(&self, at: DateTime<Utc>, record: &Record) -> Option<String> {
        let payload = match record {
            Record::Chunk(bytes) => String::from_utf8_lossy(bytes).trim_end().to_string(),
            Record::Line(line) => line.clone(),
            Record::Pgn(pgn) => pgn.to_string(),
            Record::Delta(delta) => serde_json::to_string(delta).ok()?,
        };
        Some(match &self.discriminator {
            Some(d) => format!("{};{d};{payload}", at.timestamp_millis()),
            None => payload,
        })
    }
}

/// The currently open hourly file.
struct HourlyLog {
    name: String,
    file: File,
}

async fn open_log(directory: &Path, name: String) -> std::io::Result<HourlyLog> {
    tokio::fs::create_dir_all(directory).await?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(directory.join(&name))
        .await?;
    debug!("Recording to {}", directory.join(&name).display());
    Ok(HourlyLog { name, file })
}

impl Stage for Recorder {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            let mut current: Option<HourlyLog> = None;

            while let Some(record) = link.input.recv().await {
                let now = Utc::now();
                if let Some(entry) = self.entry(now, &record) {
                    let name = log_file_name(now);
                    if current.as_ref().map_or(true, |log| log.name != name) {
                        current = match open_log(&self.directory, name).await {
                            Ok(log) => Some(log),
                            Err(e) => {
                                warn!("{}: cannot open raw log: {e}", self.provider);
                                None
                            }
                        };
                    }
                    if let Some(log) = current.as_mut() {
                        if let Err(e) = log.file.write_all(format!("{entry}\n").as_bytes()).await {
                            warn!("{}: cannot write raw log: {e}", self.provider);
                        }
                    }
                }

                if !link.send(record).await {
                    break;
                }
            }

            if let Some(mut log) = current {
                log.file.flush().await?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    #[test]
    fn test_log_file_name_is_hourly() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 59, 59).unwrap();
        assert_eq!(log_file_name(at), "skserver-raw_2024-03-09T07.log");
    }

    #[test]
    fn test_requires_logging_directory() {
        assert!(matches!(
            create(StageOptions::default(), &Arc::new(AppContext::default())),
            Err(ConfigError::MissingOption(o)) if o == "loggingDirectory"
        ));
    }

    #[test]
    fn test_entry_format() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let recorder = Recorder::new("/tmp", Some("N"));
        assert_eq!(
            recorder.entry(at, &Record::Line("$GPGLL,1".to_string())).as_deref(),
            Some("1700000000123;N;$GPGLL,1")
        );

        let multiplexed = Recorder::new("/tmp", None);
        assert_eq!(
            multiplexed.entry(at, &Record::Line("1;A;x".to_string())).as_deref(),
            Some("1;A;x")
        );
    }

    #[tokio::test]
    async fn test_passes_records_through_and_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, input) = mpsc::channel(4);
        let (output, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(
            Box::new(Recorder::new(dir.path(), Some("I"))).run(StageLink { input, output }),
        );

        tx.send(Record::Line("{\"updates\":[]}".to_string())).await.unwrap();
        tx.send(Record::Line("second".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(Record::Line("{\"updates\":[]}".to_string())));
        assert_eq!(rx.recv().await, Some(Record::Line("second".to_string())));
        assert_eq!(rx.recv().await, None);
        task.await.unwrap().unwrap();

        let mut contents = String::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            assert!(path.file_name().unwrap().to_string_lossy().starts_with("skserver-raw_"));
            contents.push_str(&std::fs::read_to_string(path).unwrap());
        }
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(";I;{\"updates\":[]}"));
        assert!(lines[1].ends_with(";I;second"));
    }
}
