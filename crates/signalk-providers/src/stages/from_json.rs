//! Signal K delta decoder for JSON lines.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::{ConfigError, Delta};
use tracing::warn;

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{AppContext, Stage, StageKind, StageLink, StageOptions};

/// Parses each line as a delta. Lines that are not valid deltas are logged
/// and dropped.
#[derive(Debug, Default)]
pub struct FromJson {
    provider: String,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(FromJson {
        provider: options.get_str("providerId").unwrap_or_default().to_string(),
    }))
}

impl Stage for FromJson {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            while let Some(record) = link.input.recv().await {
                let shape = record.shape();
                let Record::Line(line) = record else {
                    return Err(StageError::UnexpectedRecord {
                        stage: StageKind::FromJson,
                        shape,
                    });
                };

                match serde_json::from_str::<Delta>(&line) {
                    Ok(delta) => {
                        if !link.send(Record::Delta(delta)).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{}: dropping invalid delta ({e}): {line}", self.provider),
                }
            }
            Ok(())
        }
        .boxed()
    }
}
