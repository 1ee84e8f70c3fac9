//! The canonical event bus.
//!
//! Providers push deltas in; consumers ask for the stream of values at one
//! path. Only deltas about the local vessel are accepted.
//!
//! A path gets a single broadcast channel when it is first subscribed to, so
//! all handles on a path observe the same sequence. The bus also keeps the
//! latest value of every path and hands it to new handles first.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use signalk_core::Delta;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Number of values a slow path handle may fall behind before it skips.
pub const PATH_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Paths {
    latest: HashMap<String, Value>,
    channels: HashMap<String, broadcast::Sender<Value>>,
}

/// Fans deltas out to per-path value streams.
pub struct EventBus {
    self_urn: String,
    paths: Mutex<Paths>,
}

impl EventBus {
    /// Create a bus for the vessel identified by `self_urn`
    /// (e.g. "vessels.urn:mrn:signalk:uuid:...").
    pub fn new(self_urn: impl Into<String>) -> Self {
        Self {
            self_urn: self_urn.into(),
            paths: Mutex::new(Paths::default()),
        }
    }

    pub fn self_urn(&self) -> &str {
        &self.self_urn
    }

    /// Publish every value of a delta to its path.
    ///
    /// Deltas about other vessels are dropped; returns whether the delta was
    /// accepted. Pushes are serialized, so values reach each path in the
    /// order they were pushed.
    pub fn push_delta(&self, delta: &Delta) -> bool {
        if !delta.is_self(&self.self_urn) {
            trace!("Ignoring delta for {}", delta.context_or_self());
            return false;
        }

        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        for pv in delta.values() {
            if let Some(sender) = paths.channels.get(&pv.path) {
                // No receivers is fine: the value is still cached.
                let _ = sender.send(pv.value.clone());
            }
            paths.latest.insert(pv.path.clone(), pv.value.clone());
        }
        true
    }

    /// A handle on the values published at `path`.
    pub fn stream_for(&self, path: &str) -> PathStream {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = paths
            .channels
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(PATH_CHANNEL_CAPACITY).0)
            .subscribe();
        PathStream {
            path: path.to_string(),
            initial: paths.latest.get(path).cloned(),
            receiver,
        }
    }

    /// Latest value seen at `path`.
    pub fn latest(&self, path: &str) -> Option<Value> {
        let paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        paths.latest.get(path).cloned()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("self_urn", &self.self_urn)
            .field("paths", &paths.latest.len())
            .field("subscribed", &paths.channels.len())
            .finish()
    }
}

/// Values published at one path, starting with the cached latest value.
#[derive(Debug)]
pub struct PathStream {
    path: String,
    initial: Option<Value>,
    receiver: broadcast::Receiver<Value>,
}

impl PathStream {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next value, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Value> {
        if let Some(value) = self.initial.take() {
            return Some(value);
        }
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Stream for {} skipped {skipped} values", self.path);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Value> {
        stream::unfold(self, |mut this| async move {
            let value = this.next().await?;
            Some((value, this))
        })
        .boxed()
    }
}
