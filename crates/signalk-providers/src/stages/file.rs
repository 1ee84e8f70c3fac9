//! File source for replaying recorded data.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::READ_CHUNK;
use crate::error::StageError;
use crate::record::Record;
use crate::stage::{end_of_input, AppContext, Stage, StageLink, StageOptions};

/// Reads `filename` as raw chunks. With `keepRunning` the file is replayed
/// from the start each time its end is reached.
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    keep_running: bool,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(FileReader {
        path: PathBuf::from(options.require_str("filename")?),
        keep_running: options.get_bool("keepRunning"),
    }))
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>, keep_running: bool) -> Self {
        Self {
            path: path.into(),
            keep_running,
        }
    }
}

impl Stage for FileReader {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            let mut file = File::open(&self.path).await?;
            info!("Reading {}", self.path.display());
            let mut buf = vec![0u8; READ_CHUNK];

            loop {
                let n = tokio::select! {
                    _ = end_of_input(&mut link.input) => return Ok(()),
                    read = file.read(&mut buf) => read?,
                };

                if n == 0 {
                    if !self.keep_running {
                        debug!("End of {}", self.path.display());
                        return Ok(());
                    }
                    file.seek(SeekFrom::Start(0)).await?;
                    continue;
                }

                if !link.emit(Record::Chunk(buf[..n].to_vec())).await {
                    return Ok(());
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;

    #[test]
    fn test_filename_required() {
        let app = Arc::new(AppContext::default());
        assert!(matches!(
            create(StageOptions::default(), &app),
            Err(ConfigError::MissingOption(o)) if o == "filename"
        ));
    }

    #[tokio::test]
    async fn test_reads_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"line one\nline two\n").unwrap();

        let (_tx, input) = mpsc::channel(1);
        let (output, mut rx) = mpsc::channel(8);
        let reader = FileReader::new(tmp.path(), false);
        Box::new(reader).run(StageLink { input, output }).await.unwrap();

        let mut bytes = Vec::new();
        while let Ok(Record::Chunk(chunk)) = rx.try_recv() {
            bytes.extend(chunk);
        }
        assert_eq!(bytes, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_keep_running_replays_until_stopped() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let (tx, input) = mpsc::channel(1);
        let (output, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(Box::new(FileReader::new(tmp.path(), true)).run(StageLink { input, output }));

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(Record::Chunk(b"abc".to_vec())));
        }
        drop(tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_a_stage_error() {
        let (_tx, input) = mpsc::channel(1);
        let (output, _rx) = mpsc::channel(1);
        let result = Box::new(FileReader::new("/nonexistent/track.log", false))
            .run(StageLink { input, output })
            .await;
        assert!(matches!(result, Err(StageError::Io(_))));
    }
}
