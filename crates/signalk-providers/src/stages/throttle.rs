//! Byte-rate pacing for replayed files.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::time::Instant;

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{AppContext, Stage, StageKind, StageLink, StageOptions};

/// Passes chunks on at no more than `rate` bytes per second.
///
/// Chunks larger than one second's worth are split.
#[derive(Debug)]
pub struct Throttle {
    rate: u64,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    let rate = options
        .get_u64("rate")?
        .ok_or_else(|| ConfigError::MissingOption("rate".to_string()))?;
    Ok(Box::new(Throttle::new(rate)?))
}

impl Throttle {
    pub fn new(rate: u64) -> Result<Self, ConfigError> {
        if rate == 0 {
            return Err(ConfigError::InvalidOption {
                option: "rate".to_string(),
                reason: "must be at least 1 byte per second".to_string(),
            });
        }
        Ok(Self { rate })
    }

    /// Time at which `sent` bytes may have left, counting from `started`.
    fn due(&self, started: Instant, sent: u64) -> Instant {
        started + Duration::from_secs_f64(sent as f64 / self.rate as f64)
    }
}

impl Stage for Throttle {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            let piece = usize::try_from(self.rate).unwrap_or(usize::MAX);
            let mut started: Option<Instant> = None;
            let mut sent: u64 = 0;

            while let Some(record) = link.input.recv().await {
                let shape = record.shape();
                let Record::Chunk(bytes) = record else {
                    return Err(StageError::UnexpectedRecord {
                        stage: StageKind::Throttle,
                        shape,
                    });
                };

                let started = *started.get_or_insert_with(Instant::now);
                for part in bytes.chunks(piece) {
                    tokio::time::sleep_until(self.due(started, sent)).await;
                    sent += part.len() as u64;
                    if !link.send(Record::Chunk(part.to_vec())).await {
                        return Ok(());
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_zero_rate_rejected() {
        assert!(Throttle::new(0).is_err());
        let mut options = StageOptions::default();
        options.insert("rate", 0);
        assert!(create(options, &Arc::new(AppContext::default())).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_to_rate() {
        let (tx, input) = mpsc::channel(4);
        let (output, mut rx) = mpsc::channel(4);
        tokio::spawn(Box::new(Throttle::new(10).unwrap()).run(StageLink { input, output }));

        let start = Instant::now();
        tx.send(Record::Chunk(vec![b'x'; 25])).await.unwrap();
        drop(tx);

        let mut arrivals = Vec::new();
        while let Some(Record::Chunk(part)) = rx.recv().await {
            arrivals.push((part.len(), start.elapsed()));
        }

        assert_eq!(
            arrivals,
            vec![
                (10, Duration::ZERO),
                (10, Duration::from_secs(1)),
                (5, Duration::from_secs(2)),
            ]
        );
    }
}
