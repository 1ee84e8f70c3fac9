//! Subprocess sources.
//!
//! `execute` runs a shell command and forwards its stdout as raw chunks.
//! `candump` runs the packet-capture command the composer derived from the
//! CAN interface name and forwards stdout line by line, since candump output
//! is already framed.

use std::process::Stdio;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::READ_CHUNK;
use crate::error::StageError;
use crate::record::Record;
use crate::stage::{end_of_input, AppContext, Stage, StageLink, StageOptions};

/// How subprocess output is turned into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Chunks,
    Lines,
}

/// Runs `command` through `sh -c`. The child is killed when the stage ends.
#[derive(Debug)]
pub struct Execute {
    command: String,
    framing: Framing,
}

pub(crate) fn create_execute(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(Execute::new(options.require_str("command")?, Framing::Chunks)))
}

pub(crate) fn create_candump(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(Execute::new(options.require_str("command")?, Framing::Lines)))
}

impl Execute {
    pub fn new(command: impl Into<String>, framing: Framing) -> Self {
        Self {
            command: command.into(),
            framing,
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

impl Stage for Execute {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            let mut child = self.spawn()?;
            info!("Started `{}` (pid {:?})", self.command, child.id());

            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(log_stderr(self.command.clone(), stderr));
            }
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| StageError::Failed("child stdout not captured".to_string()))?;

            let finished = match self.framing {
                Framing::Chunks => forward_chunks(stdout, &mut link).await?,
                Framing::Lines => forward_lines(stdout, &mut link).await?,
            };

            if finished {
                let status = child.wait().await?;
                debug!("`{}` exited with {status}", self.command);
                if !status.success() {
                    return Err(StageError::Failed(format!(
                        "`{}` exited with {status}",
                        self.command
                    )));
                }
            } else {
                debug!("Stopping `{}`", self.command);
                if let Err(e) = child.kill().await {
                    debug!("Could not kill `{}`: {e}", self.command);
                }
            }
            Ok(())
        }
        .boxed()
    }
}

/// Forward raw output. Returns true if the process closed its output,
/// false if the stage was told to stop.
async fn forward_chunks(
    mut stdout: impl AsyncRead + Unpin,
    link: &mut StageLink,
) -> Result<bool, StageError> {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            _ = end_of_input(&mut link.input) => return Ok(false),
            read = stdout.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(true);
        }
        if !link.emit(Record::Chunk(buf[..n].to_vec())).await {
            return Ok(false);
        }
    }
}

async fn forward_lines(
    stdout: impl AsyncRead + Unpin,
    link: &mut StageLink,
) -> Result<bool, StageError> {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = end_of_input(&mut link.input) => return Ok(false),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(true);
        };
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if !link.emit(Record::Line(line.to_string())).await {
            return Ok(false);
        }
    }
}

async fn log_stderr(command: String, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("`{command}`: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn collect(stage: Execute) -> (Result<(), StageError>, Vec<Record>) {
        let (_tx, input) = mpsc::channel(1);
        let (output, mut rx) = mpsc::channel(64);
        let result = Box::new(stage).run(StageLink { input, output }).await;
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        (result, records)
    }

    #[test]
    fn test_command_required() {
        let app = Arc::new(AppContext::default());
        assert!(create_execute(StageOptions::default(), &app).is_err());
        assert!(create_candump(StageOptions::default(), &app).is_err());
    }

    #[tokio::test]
    async fn test_chunks_from_stdout() {
        let (result, records) = collect(Execute::new("printf 'a\\nb\\n'", Framing::Chunks)).await;
        result.unwrap();
        let bytes: Vec<u8> = records
            .into_iter()
            .flat_map(|r| match r {
                Record::Chunk(bytes) => bytes,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(bytes, b"a\nb\n");
    }

    #[tokio::test]
    async fn test_lines_from_stdout() {
        let (result, records) = collect(Execute::new(
            "printf '  can0  1F8 [8] 00\\n\\n  can0  1F9 [2] 01 02\\n'",
            Framing::Lines,
        ))
        .await;
        result.unwrap();
        assert_eq!(
            records,
            vec![
                Record::Line("  can0  1F8 [8] 00".to_string()),
                Record::Line("  can0  1F9 [2] 01 02".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_command_is_a_stage_error() {
        let (result, _) = collect(Execute::new("exit 3", Framing::Chunks)).await;
        assert!(matches!(result, Err(StageError::Failed(_))));
    }

    #[tokio::test]
    async fn test_stop_kills_long_running_command() {
        let (tx, input) = mpsc::channel(1);
        let (output, _rx) = mpsc::channel(1);
        let task = tokio::spawn(Box::new(Execute::new("sleep 30", Framing::Chunks)).run(StageLink { input, output }));
        drop(tx);
        task.await.unwrap().unwrap();
    }
}
