//! Running a provider: drain its pipeline into a delta sink.

use signalk_core::Delta;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::pipeline::{Pipeline, StopHandle};

/// Label `$source` with the provider id on updates that carry no source.
pub fn stamp_source(delta: &mut Delta, provider_id: &str) {
    for update in &mut delta.updates {
        if update.source_ref.is_none() && update.source.is_none() {
            update.source_ref = Some(provider_id.to_string());
        }
    }
}

/// Forward every delta of a started pipeline to `sink` until the pipeline
/// closes, then wait for its stages. Returns the number of deltas forwarded.
pub async fn drive<F>(mut pipeline: Pipeline, mut sink: F) -> u64
where
    F: FnMut(Delta),
{
    let mut forwarded = 0;
    while let Some(mut delta) = pipeline.recv().await {
        stamp_source(&mut delta, pipeline.id());
        sink(delta);
        forwarded += 1;
    }
    info!("Provider {} closed after {forwarded} deltas", pipeline.id());
    pipeline.join().await;
    forwarded
}

/// A provider running in the background.
#[derive(Debug)]
pub struct ProviderHandle {
    id: String,
    stop: StopHandle,
    task: JoinHandle<u64>,
}

impl ProviderHandle {
    /// Start `pipeline` and forward its deltas to `sink` on a new task.
    pub fn spawn<F>(mut pipeline: Pipeline, sink: F) -> Result<Self, ProviderError>
    where
        F: FnMut(Delta) + Send + 'static,
    {
        pipeline.start()?;
        Ok(Self {
            id: pipeline.id().to_string(),
            stop: pipeline.stop_handle(),
            task: tokio::spawn(drive(pipeline, sink)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Signal end-of-input to the provider's first stage.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the provider to wind down. Returns the number of deltas it
    /// forwarded.
    pub async fn join(self) -> u64 {
        match self.task.await {
            Ok(forwarded) => forwarded,
            Err(e) => {
                warn!("Provider {} task failed: {e}", self.id);
                0
            }
        }
    }
}
